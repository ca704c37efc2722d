use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{Store, StoreError, TokenIssuance};
use crate::models::{
    Application, Credential, CredentialType, Installation, MigrationMarker, MigrationState,
    Session, Token,
};

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<String, Session>,
    tokens: HashMap<String, Token>,
    credentials: HashMap<String, Credential>,
    applications: HashMap<String, Application>,
    installations: HashMap<String, Installation>,
    migrations: HashMap<String, MigrationMarker>,
}

/// In-process store. One mutex guards all state, so every operation is
/// trivially linearizable; used for tests and single-node development.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.state().map(|_| ())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.sessions.contains_key(&session.id) {
            return Err(StoreError::Duplicate(format!("session {}", session.id)));
        }
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.state()?.sessions.get(session_id).cloned())
    }

    async fn claim_session_slot(
        &self,
        session_id: &str,
        authorized_app: Option<&str>,
    ) -> Result<Option<Session>, StoreError> {
        let mut state = self.state()?;
        let Some(session) = state.sessions.get_mut(session_id) else {
            return Ok(None);
        };
        if session.terminated {
            return Ok(None);
        }

        let before = session.clone();
        session.token_count += 1;
        if let Some(app) = authorized_app {
            if !session.authorized_apps.iter().any(|a| a == app) {
                session.authorized_apps.push(app.to_string());
            }
        }
        Ok(Some(before))
    }

    async fn raise_session_expiry(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if let Some(session) = state.sessions.get_mut(session_id) {
            if session.expires_at < at {
                session.expires_at = at;
            }
        }
        Ok(())
    }

    async fn terminate_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        match state.sessions.get_mut(session_id) {
            Some(session) if !session.terminated => {
                session.terminated = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_token(&self, token: &Token) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.tokens.contains_key(&token.id) {
            return Err(StoreError::Duplicate(format!("token {}", token.id)));
        }
        if let Some(index) = token.index {
            let taken = state
                .tokens
                .values()
                .any(|t| t.session_id == token.session_id && t.index == Some(index));
            if taken {
                return Err(StoreError::Duplicate(format!(
                    "slot {} of session {}",
                    index, token.session_id
                )));
            }
        }
        state.tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn find_token(&self, token_id: &str) -> Result<Option<Token>, StoreError> {
        Ok(self.state()?.tokens.get(token_id).cloned())
    }

    async fn record_token_issuance(
        &self,
        token_id: &str,
        issuance: &TokenIssuance,
    ) -> Result<Option<Token>, StoreError> {
        let mut state = self.state()?;
        let Some(token) = state.tokens.get_mut(token_id) else {
            return Ok(None);
        };
        if !token.is_active_at(issuance.issued_at) {
            return Ok(None);
        }

        token.jwt_expires_at = Some(issuance.jwt_expires_at);
        token.refresh_token_hash = issuance.refresh_token_hash.clone();
        token.refresh_expires_at = issuance.refresh_expires_at;
        token.last_issued_at = Some(issuance.issued_at);
        token.issued_count += 1;
        Ok(Some(token.clone()))
    }

    async fn redeem_refresh_token(
        &self,
        refresh_token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError> {
        let mut state = self.state()?;
        let found = state.tokens.values_mut().find(|t| {
            t.refresh_token_hash.as_deref() == Some(refresh_token_hash)
                && t.refresh_expires_at.is_some_and(|exp| exp > now)
                && t.is_active_at(now)
        });

        Ok(found.map(|token| {
            token.refresh_token_hash = None;
            token.refresh_expires_at = None;
            token.clone()
        }))
    }

    async fn set_exchange_code(
        &self,
        token_id: &str,
        code_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        match state.tokens.get_mut(token_id) {
            Some(token) if !token.terminated => {
                token.exchange_code_hash = Some(code_hash.to_string());
                token.exchange_code_expires_at = Some(expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn redeem_exchange_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError> {
        let mut state = self.state()?;
        let found = state.tokens.values_mut().find(|t| {
            t.exchange_code_hash.as_deref() == Some(code_hash)
                && t.exchange_code_expires_at.is_some_and(|exp| exp > now)
                && t.is_active_at(now)
        });

        Ok(found.map(|token| {
            token.exchange_code_hash = None;
            token.exchange_code_expires_at = None;
            token.clone()
        }))
    }

    async fn terminate_session_tokens(&self, session_id: &str) -> Result<u64, StoreError> {
        let mut state = self.state()?;
        let mut changed = 0;
        for token in state
            .tokens
            .values_mut()
            .filter(|t| t.session_id == session_id && !t.terminated)
        {
            token.terminated = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn upsert_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let clash = state.credentials.values().any(|c| {
            c.id != credential.id
                && c.credential_type == credential.credential_type
                && c.identifiers.iter().any(|i| credential.identifiers.contains(i))
        });
        if clash {
            return Err(StoreError::Duplicate(format!(
                "{} credential identifier",
                credential.credential_type
            )));
        }
        state
            .credentials
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn find_credential(
        &self,
        credential_id: &str,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(self.state()?.credentials.get(credential_id).cloned())
    }

    async fn find_user_credentials(&self, user_id: &str) -> Result<Vec<Credential>, StoreError> {
        Ok(self
            .state()?
            .credentials
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_credential_by_identifier(
        &self,
        credential_type: CredentialType,
        identifier: &str,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .state()?
            .credentials
            .values()
            .find(|c| {
                c.credential_type == credential_type && c.identifiers.iter().any(|i| i == identifier)
            })
            .cloned())
    }

    async fn consume_credential(
        &self,
        credential_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Credential>, StoreError> {
        let mut state = self.state()?;
        match state.credentials.get_mut(credential_id) {
            Some(credential) if credential.is_usable_at(now) => {
                credential.use_count -= 1;
                credential.access_count += 1;
                credential.last_accessed_at = Some(now);
                Ok(Some(credential.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_credential(&self, credential_id: &str) -> Result<bool, StoreError> {
        Ok(self.state()?.credentials.remove(credential_id).is_some())
    }

    async fn disable_credential(&self, credential_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        match state.credentials.get_mut(credential_id) {
            Some(credential) if !credential.disabled => {
                credential.disabled = true;
                credential.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_application(&self, application: &Application) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.applications.contains_key(&application.id) {
            return Err(StoreError::Duplicate(format!(
                "application {}",
                application.id
            )));
        }
        state
            .applications
            .insert(application.id.clone(), application.clone());
        Ok(())
    }

    async fn find_application(&self, app_id: &str) -> Result<Option<Application>, StoreError> {
        Ok(self.state()?.applications.get(app_id).cloned())
    }

    async fn insert_installation(&self, installation: &Installation) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let exists = state
            .installations
            .values()
            .any(|i| i.user_id == installation.user_id && i.app_id == installation.app_id);
        if exists {
            return Err(StoreError::Duplicate(format!(
                "installation of {} for {}",
                installation.app_id, installation.user_id
            )));
        }
        state
            .installations
            .insert(installation.id.clone(), installation.clone());
        Ok(())
    }

    async fn find_installation(
        &self,
        user_id: &str,
        app_id: &str,
    ) -> Result<Option<Installation>, StoreError> {
        Ok(self
            .state()?
            .installations
            .values()
            .find(|i| i.user_id == user_id && i.app_id == app_id)
            .cloned())
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn try_begin_migration(&self, step: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        if state.migrations.contains_key(step) {
            return Ok(false);
        }
        state
            .migrations
            .insert(step.to_string(), MigrationMarker::started(step));
        Ok(true)
    }

    async fn complete_migration(&self, step: &str) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let marker = state
            .migrations
            .get_mut(step)
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("Migration {} not started", step)))?;
        marker.state = MigrationState::Complete;
        marker.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn abandon_migration(&self, step: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let in_progress = state
            .migrations
            .get(step)
            .is_some_and(|m| m.state == MigrationState::InProgress);
        if in_progress {
            state.migrations.remove(step);
        }
        Ok(in_progress)
    }

    async fn find_migration(&self, step: &str) -> Result<Option<MigrationMarker>, StoreError> {
        Ok(self.state()?.migrations.get(step).cloned())
    }
}
