//! Persistence boundary.
//!
//! Every mutation that must happen exactly once under concurrent workers
//! is a conditional update here: it applies only if its guard still holds
//! at apply time and reports whether it did. Implementations must make
//! each of these linearizable per document.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Application, Credential, CredentialType, Installation, MigrationMarker, Session, Token,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate value: {0}")]
    Duplicate(String),

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Bookkeeping written each time a token is signed.
#[derive(Debug, Clone)]
pub struct TokenIssuance {
    pub jwt_expires_at: DateTime<Utc>,
    pub refresh_token_hash: Option<String>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    // ==================== Sessions ====================

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// If the session exists and is not terminated: increment
    /// `token_count`, add `authorized_app` to the authorized set, and
    /// return the session as it was *before* the update.
    async fn claim_session_slot(
        &self,
        session_id: &str,
        authorized_app: Option<&str>,
    ) -> Result<Option<Session>, StoreError>;

    /// Raise the session watermark to `at` if it is currently lower.
    async fn raise_session_expiry(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Tombstone the session. Returns false if it was already terminated
    /// or does not exist.
    async fn terminate_session(&self, session_id: &str) -> Result<bool, StoreError>;

    // ==================== Tokens ====================

    async fn insert_token(&self, token: &Token) -> Result<(), StoreError>;

    async fn find_token(&self, token_id: &str) -> Result<Option<Token>, StoreError>;

    /// Persist signing bookkeeping if the token is still active at
    /// `issuance.issued_at`; returns the updated token.
    async fn record_token_issuance(
        &self,
        token_id: &str,
        issuance: &TokenIssuance,
    ) -> Result<Option<Token>, StoreError>;

    /// Atomically clear a matching, unexpired refresh artifact on an
    /// active token and return that token. At most one caller per
    /// artifact observes `Some`.
    async fn redeem_refresh_token(
        &self,
        refresh_token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError>;

    async fn set_exchange_code(
        &self,
        token_id: &str,
        code_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Same contract as `redeem_refresh_token`, for exchange codes.
    async fn redeem_exchange_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError>;

    /// Tombstone every token of a session; returns how many changed.
    async fn terminate_session_tokens(&self, session_id: &str) -> Result<u64, StoreError>;

    // ==================== Credentials ====================

    /// Insert or replace by id.
    async fn upsert_credential(&self, credential: &Credential) -> Result<(), StoreError>;

    async fn find_credential(&self, credential_id: &str)
        -> Result<Option<Credential>, StoreError>;

    async fn find_user_credentials(&self, user_id: &str) -> Result<Vec<Credential>, StoreError>;

    async fn find_credential_by_identifier(
        &self,
        credential_type: CredentialType,
        identifier: &str,
    ) -> Result<Option<Credential>, StoreError>;

    /// Guard: enabled, `valid_after <= now < valid_before`, `use_count > 0`.
    /// On success decrement `use_count`, increment `access_count`, stamp
    /// `last_accessed_at`, and return the updated credential.
    async fn consume_credential(
        &self,
        credential_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Credential>, StoreError>;

    async fn delete_credential(&self, credential_id: &str) -> Result<bool, StoreError>;

    async fn disable_credential(&self, credential_id: &str) -> Result<bool, StoreError>;

    // ==================== Applications ====================

    async fn insert_application(&self, application: &Application) -> Result<(), StoreError>;

    async fn find_application(&self, app_id: &str) -> Result<Option<Application>, StoreError>;

    async fn insert_installation(&self, installation: &Installation) -> Result<(), StoreError>;

    async fn find_installation(
        &self,
        user_id: &str,
        app_id: &str,
    ) -> Result<Option<Installation>, StoreError>;

    // ==================== Migrations ====================

    async fn ensure_indexes(&self) -> Result<(), StoreError>;

    /// Insert the in-progress marker for `step`. Returns false if some
    /// worker already holds or finished it.
    async fn try_begin_migration(&self, step: &str) -> Result<bool, StoreError>;

    async fn complete_migration(&self, step: &str) -> Result<(), StoreError>;

    /// Delete the marker for `step` if it is still in progress, so another
    /// worker can claim the step. Returns whether a marker was removed.
    async fn abandon_migration(&self, step: &str) -> Result<bool, StoreError>;

    async fn find_migration(&self, step: &str) -> Result<Option<MigrationMarker>, StoreError>;
}
