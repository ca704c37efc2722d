use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, DateTime as BsonDateTime, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, IndexOptions, ReplaceOptions, ReturnDocument},
    Client as MongoClient, Collection, Database, IndexModel,
};

use super::{Store, StoreError, TokenIssuance};
use crate::models::{
    Application, Credential, CredentialType, Installation, MigrationMarker, MigrationState,
    Session, Token,
};

const DUPLICATE_KEY: i32 = 11000;

impl From<mongodb::error::Error> for StoreError {
    fn from(e: mongodb::error::Error) -> Self {
        let duplicate = match e.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == DUPLICATE_KEY,
            ErrorKind::Command(ce) => ce.code == DUPLICATE_KEY,
            _ => false,
        };
        if duplicate {
            StoreError::Duplicate(e.to_string())
        } else {
            StoreError::Backend(e.into())
        }
    }
}

fn bson_time(at: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_chrono(at)
}

fn after() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

fn before() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::Before)
        .build()
}

#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            StoreError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    fn sessions(&self) -> Collection<Session> {
        self.db.collection("sessions")
    }

    fn tokens(&self) -> Collection<Token> {
        self.db.collection("tokens")
    }

    fn credentials(&self) -> Collection<Credential> {
        self.db.collection("credentials")
    }

    fn applications(&self) -> Collection<Application> {
        self.db.collection("applications")
    }

    fn installations(&self) -> Collection<Installation> {
        self.db.collection("installations")
    }

    fn migrations(&self) -> Collection<MigrationMarker> {
        self.db.collection("migrations")
    }

    async fn create_index<T: Send + Sync>(
        collection: &Collection<T>,
        keys: Document,
        options: IndexOptions,
    ) -> Result<(), StoreError> {
        let name = options.name.clone().unwrap_or_default();
        let model = IndexModel::builder().keys(keys).options(options).build();
        collection.create_index(model, None).await.map_err(|e| {
            tracing::error!(
                "Failed to create index {} on {}: {}",
                name,
                collection.name(),
                e
            );
            StoreError::from(e)
        })?;
        tracing::info!(index = %name, collection = %collection.name(), "Created index");
        Ok(())
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                StoreError::from(e)
            })?;
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions().insert_one(session, None).await?;
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self
            .sessions()
            .find_one(doc! { "_id": session_id }, None)
            .await?)
    }

    async fn claim_session_slot(
        &self,
        session_id: &str,
        authorized_app: Option<&str>,
    ) -> Result<Option<Session>, StoreError> {
        let mut update = doc! { "$inc": { "token_count": 1_i64 } };
        if let Some(app) = authorized_app {
            update.insert("$addToSet", doc! { "authorized_apps": app });
        }

        Ok(self
            .sessions()
            .find_one_and_update(
                doc! { "_id": session_id, "terminated": false },
                update,
                before(),
            )
            .await?)
    }

    async fn raise_session_expiry(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.sessions()
            .update_one(
                doc! { "_id": session_id },
                doc! { "$max": { "expires_at": bson_time(at) } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn terminate_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let result = self
            .sessions()
            .update_one(
                doc! { "_id": session_id, "terminated": false },
                doc! { "$set": { "terminated": true } },
                None,
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    async fn insert_token(&self, token: &Token) -> Result<(), StoreError> {
        self.tokens().insert_one(token, None).await?;
        Ok(())
    }

    async fn find_token(&self, token_id: &str) -> Result<Option<Token>, StoreError> {
        Ok(self.tokens().find_one(doc! { "_id": token_id }, None).await?)
    }

    async fn record_token_issuance(
        &self,
        token_id: &str,
        issuance: &TokenIssuance,
    ) -> Result<Option<Token>, StoreError> {
        let issued_at = bson_time(issuance.issued_at);
        let refresh_expires_at: Bson = issuance.refresh_expires_at.map(bson_time).into();
        let refresh_token_hash: Bson = issuance.refresh_token_hash.clone().into();

        Ok(self
            .tokens()
            .find_one_and_update(
                doc! {
                    "_id": token_id,
                    "terminated": false,
                    "expires_at": { "$gt": issued_at },
                },
                doc! {
                    "$set": {
                        "jwt_expires_at": bson_time(issuance.jwt_expires_at),
                        "refresh_token_hash": refresh_token_hash,
                        "refresh_expires_at": refresh_expires_at,
                        "last_issued_at": issued_at,
                    },
                    "$inc": { "issued_count": 1_i64 },
                },
                after(),
            )
            .await?)
    }

    async fn redeem_refresh_token(
        &self,
        refresh_token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError> {
        let now = bson_time(now);
        Ok(self
            .tokens()
            .find_one_and_update(
                doc! {
                    "refresh_token_hash": refresh_token_hash,
                    "refresh_expires_at": { "$gt": now },
                    "terminated": false,
                    "expires_at": { "$gt": now },
                },
                doc! { "$set": { "refresh_token_hash": Bson::Null, "refresh_expires_at": Bson::Null } },
                after(),
            )
            .await?)
    }

    async fn set_exchange_code(
        &self,
        token_id: &str,
        code_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = self
            .tokens()
            .update_one(
                doc! { "_id": token_id, "terminated": false },
                doc! {
                    "$set": {
                        "exchange_code_hash": code_hash,
                        "exchange_code_expires_at": bson_time(expires_at),
                    }
                },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn redeem_exchange_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError> {
        let now = bson_time(now);
        Ok(self
            .tokens()
            .find_one_and_update(
                doc! {
                    "exchange_code_hash": code_hash,
                    "exchange_code_expires_at": { "$gt": now },
                    "terminated": false,
                    "expires_at": { "$gt": now },
                },
                doc! {
                    "$set": {
                        "exchange_code_hash": Bson::Null,
                        "exchange_code_expires_at": Bson::Null,
                    }
                },
                after(),
            )
            .await?)
    }

    async fn terminate_session_tokens(&self, session_id: &str) -> Result<u64, StoreError> {
        let result = self
            .tokens()
            .update_many(
                doc! { "session_id": session_id, "terminated": false },
                doc! { "$set": { "terminated": true } },
                None,
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn upsert_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.credentials()
            .replace_one(doc! { "_id": credential.id.as_str() }, credential, options)
            .await?;
        Ok(())
    }

    async fn find_credential(
        &self,
        credential_id: &str,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .credentials()
            .find_one(doc! { "_id": credential_id }, None)
            .await?)
    }

    async fn find_user_credentials(&self, user_id: &str) -> Result<Vec<Credential>, StoreError> {
        let cursor = self
            .credentials()
            .find(doc! { "user_id": user_id }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_credential_by_identifier(
        &self,
        credential_type: CredentialType,
        identifier: &str,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .credentials()
            .find_one(
                doc! { "credential_type": credential_type.as_str(), "identifiers": identifier },
                None,
            )
            .await?)
    }

    async fn consume_credential(
        &self,
        credential_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Credential>, StoreError> {
        let now = bson_time(now);
        Ok(self
            .credentials()
            .find_one_and_update(
                doc! {
                    "_id": credential_id,
                    "disabled": false,
                    "valid_after": { "$lte": now },
                    "valid_before": { "$gt": now },
                    "use_count": { "$gt": 0_i64 },
                },
                doc! {
                    "$inc": { "use_count": -1_i64, "access_count": 1_i64 },
                    "$set": { "last_accessed_at": now },
                },
                after(),
            )
            .await?)
    }

    async fn delete_credential(&self, credential_id: &str) -> Result<bool, StoreError> {
        let result = self
            .credentials()
            .delete_one(doc! { "_id": credential_id }, None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn disable_credential(&self, credential_id: &str) -> Result<bool, StoreError> {
        let result = self
            .credentials()
            .update_one(
                doc! { "_id": credential_id, "disabled": false },
                doc! { "$set": { "disabled": true, "updated_at": bson_time(Utc::now()) } },
                None,
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    async fn insert_application(&self, application: &Application) -> Result<(), StoreError> {
        self.applications().insert_one(application, None).await?;
        Ok(())
    }

    async fn find_application(&self, app_id: &str) -> Result<Option<Application>, StoreError> {
        Ok(self
            .applications()
            .find_one(doc! { "_id": app_id }, None)
            .await?)
    }

    async fn insert_installation(&self, installation: &Installation) -> Result<(), StoreError> {
        self.installations().insert_one(installation, None).await?;
        Ok(())
    }

    async fn find_installation(
        &self,
        user_id: &str,
        app_id: &str,
    ) -> Result<Option<Installation>, StoreError> {
        Ok(self
            .installations()
            .find_one(doc! { "user_id": user_id, "app_id": app_id }, None)
            .await?)
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        tracing::info!("Creating MongoDB indexes for trust-service");

        // One ladder token per slot; derived tokens carry no index
        Self::create_index(
            &self.tokens(),
            doc! { "session_id": 1, "index": 1 },
            IndexOptions::builder()
                .name("session_slot_unique".to_string())
                .unique(true)
                .partial_filter_expression(doc! { "index": { "$exists": true } })
                .build(),
        )
        .await?;

        Self::create_index(
            &self.tokens(),
            doc! { "refresh_token_hash": 1 },
            IndexOptions::builder()
                .name("refresh_token_lookup".to_string())
                .sparse(true)
                .build(),
        )
        .await?;

        Self::create_index(
            &self.tokens(),
            doc! { "exchange_code_hash": 1 },
            IndexOptions::builder()
                .name("exchange_code_lookup".to_string())
                .sparse(true)
                .build(),
        )
        .await?;

        Self::create_index(
            &self.credentials(),
            doc! { "user_id": 1 },
            IndexOptions::builder()
                .name("user_credentials_lookup".to_string())
                .build(),
        )
        .await?;

        Self::create_index(
            &self.credentials(),
            doc! { "credential_type": 1, "identifiers": 1 },
            IndexOptions::builder()
                .name("credential_identifier_unique".to_string())
                .unique(true)
                .partial_filter_expression(doc! { "identifiers.0": { "$exists": true } })
                .build(),
        )
        .await?;

        Self::create_index(
            &self.installations(),
            doc! { "user_id": 1, "app_id": 1 },
            IndexOptions::builder()
                .name("installation_unique".to_string())
                .unique(true)
                .build(),
        )
        .await?;

        Ok(())
    }

    async fn try_begin_migration(&self, step: &str) -> Result<bool, StoreError> {
        match self
            .migrations()
            .insert_one(MigrationMarker::started(step), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match StoreError::from(e) {
                StoreError::Duplicate(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn complete_migration(&self, step: &str) -> Result<(), StoreError> {
        let state = mongodb::bson::to_bson(&MigrationState::Complete)
            .map_err(|e| StoreError::Backend(e.into()))?;
        self.migrations()
            .update_one(
                doc! { "_id": step },
                doc! { "$set": { "state": state, "completed_at": bson_time(Utc::now()) } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn abandon_migration(&self, step: &str) -> Result<bool, StoreError> {
        let state = mongodb::bson::to_bson(&MigrationState::InProgress)
            .map_err(|e| StoreError::Backend(e.into()))?;
        let result = self
            .migrations()
            .delete_one(doc! { "_id": step, "state": state }, None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn find_migration(&self, step: &str) -> Result<Option<MigrationMarker>, StoreError> {
        Ok(self
            .migrations()
            .find_one(doc! { "_id": step }, None)
            .await?)
    }
}
