//! Session and derivation engine.
//!
//! A session holds a ladder of slot tokens ordered by creation; each slot
//! carries the full self scope at some security level. Derived tokens hang
//! off a slot, are bound to a client application and carry the subset of
//! that application's installation grants scoped to one target app.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::credential::{CredentialService, LoginOutcome, VerifyOutcome};
use super::events::{LifecycleEvent, Listeners};
use super::token::{IssuedToken, SignedToken, TimeoutKind, TokenService};
use super::ServiceError;
use crate::models::{CredentialType, NewToken, SecurityLevel, Session, SessionEnvironment, Token};
use crate::permission::{filter_for_app, Permission};
use crate::store::Store;

/// Matchers granting everything inside `app_id`.
pub fn self_scope(app_id: &str) -> Vec<String> {
    vec![format!("{}/*", app_id), format!("{}/*/**", app_id)]
}

/// What a derivation would grant.
#[derive(Debug, Clone, Serialize)]
pub struct DerivePlan {
    pub target_app_id: String,
    pub client_app_id: String,
    /// Compact permission strings stored on the derived token
    pub permissions: Vec<String>,
    /// Same permissions, scoped to `target_app_id`
    pub scope: Vec<String>,
    pub confidential: bool,
}

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub session: Session,
    pub login: LoginOutcome,
    /// Highest slot opened by the login
    pub issued: IssuedToken,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn Store>,
    tokens: TokenService,
    credentials: CredentialService,
    listeners: Listeners,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: TokenService,
        credentials: CredentialService,
        listeners: Listeners,
    ) -> Self {
        Self {
            store,
            tokens,
            credentials,
            listeners,
        }
    }

    /// Open a session: slot 0 at level 0 always, slot 1 at the asserted
    /// level when it is above 0.
    pub async fn login(
        &self,
        credential_type: CredentialType,
        payload: &serde_json::Value,
        environment: SessionEnvironment,
        with_code: bool,
    ) -> Result<LoginResult, ServiceError> {
        let login = self.credentials.login(credential_type, payload).await?;

        self.listeners.before(&LifecycleEvent::Login {
            user_id: login.user_id.clone(),
            credential_id: login.credential_id.clone(),
            level: login.level,
        })?;

        let elevated = login.level > SecurityLevel::MIN;
        let session = Session::new(login.user_id.clone(), if elevated { 2 } else { 1 }, environment);
        self.store.insert_session(&session).await?;

        let now = Utc::now();
        let base = self.ladder_slot(
            &session,
            SecurityLevel::MIN,
            None,
            Some(login.credential_id.clone()),
            0,
            now + Duration::seconds(self.session_timeout(SecurityLevel::MIN, login.expires_in)),
        );

        let issued = if elevated {
            let root = Token::from(base);
            self.store.insert_token(&root).await?;

            let expires_at = root
                .expires_at
                .min(now + Duration::seconds(self.session_timeout(login.level, login.expires_in)));
            let slot = self.ladder_slot(
                &session,
                login.level,
                Some(root.id.clone()),
                Some(login.credential_id.clone()),
                1,
                expires_at,
            );
            self.tokens.create_and_sign_token(slot, with_code, None).await?
        } else {
            self.tokens.create_and_sign_token(base, with_code, None).await?
        };

        self.listeners.after(
            &LifecycleEvent::Login {
                user_id: login.user_id.clone(),
                credential_id: login.credential_id.clone(),
                level: login.level,
            },
            &session.id,
        );
        tracing::info!(
            session_id = %session.id,
            user_id = %session.user_id,
            level = %login.level,
            "Session opened"
        );

        Ok(LoginResult {
            session,
            login,
            issued,
        })
    }

    /// Append a slot above `current` using a credential the caller just
    /// verified.
    pub async fn elevate(
        &self,
        current: &Token,
        verified: &VerifyOutcome,
        with_code: bool,
    ) -> Result<IssuedToken, ServiceError> {
        if let Some(client_id) = &current.client_id {
            return Err(ServiceError::DerivationRestricted(client_id.clone()));
        }

        let event = LifecycleEvent::Elevate {
            session_id: current.session_id.clone(),
            parent_id: current.id.clone(),
            credential_id: verified.credential_id.clone(),
            level: verified.level,
        };
        self.listeners.before(&event)?;

        let session = self
            .store
            .claim_session_slot(&current.session_id, None)
            .await?
            .ok_or(ServiceError::SessionNotFound)?;

        let expires_at = current.expires_at.min(
            Utc::now() + Duration::seconds(self.session_timeout(verified.level, verified.expires_in)),
        );
        let slot = self.ladder_slot(
            &session,
            verified.level,
            Some(current.id.clone()),
            Some(verified.credential_id.clone()),
            session.token_count,
            expires_at,
        );
        let issued = self.tokens.create_and_sign_token(slot, with_code, None).await?;

        self.listeners.after(&event, &issued.token.id);
        Ok(issued)
    }

    /// Validate a derivation without mutating anything.
    pub async fn check_derive(
        &self,
        current: &Token,
        target_app_id: Option<&str>,
        client_app_id: &str,
        level: SecurityLevel,
    ) -> Result<DerivePlan, ServiceError> {
        if let Some(bound) = &current.client_id {
            if target_app_id != Some(bound.as_str()) || client_app_id != bound {
                return Err(ServiceError::DerivationRestricted(bound.clone()));
            }
        }

        if level > current.level {
            return Err(ServiceError::InsufficientSecurityLevel);
        }

        let target_app_id = target_app_id.unwrap_or(self.tokens.self_app_id());
        let target = self
            .store
            .find_application(target_app_id)
            .await?
            .ok_or_else(|| ServiceError::ApplicationNotFound(target_app_id.to_string()))?;
        if target.disabled {
            return Err(ServiceError::AppDisabled(target.id));
        }
        if target.max_level < level {
            return Err(ServiceError::SecurityLevelExceedsApp(target.id));
        }

        let client = if client_app_id == target.id {
            target
        } else {
            let client = self
                .store
                .find_application(client_app_id)
                .await?
                .ok_or_else(|| ServiceError::ApplicationNotFound(client_app_id.to_string()))?;
            if client.disabled {
                return Err(ServiceError::AppDisabled(client.id));
            }
            client
        };

        let installation = self
            .store
            .find_installation(&current.user_id, client_app_id)
            .await?
            .filter(|i| !i.disabled)
            .ok_or_else(|| ServiceError::AppNotInstalled(client_app_id.to_string()))?;

        let granted = filter_for_app(&installation.permissions, &installation.app_id, target_app_id)?;
        if granted.is_empty() {
            return Err(ServiceError::NoPermission(target_app_id.to_string()));
        }

        Ok(DerivePlan {
            target_app_id: target_app_id.to_string(),
            client_app_id: client_app_id.to_string(),
            permissions: granted.iter().map(Permission::to_compact).collect(),
            scope: granted.iter().map(Permission::to_scoped).collect(),
            confidential: client.is_confidential(),
        })
    }

    /// Mint a client-bound token under `current`. It inherits the parent's
    /// absolute expiry and timeouts, so it never outlives it.
    pub async fn derive(
        &self,
        current: &Token,
        target_app_id: Option<&str>,
        client_app_id: &str,
        level: SecurityLevel,
        with_code: bool,
    ) -> Result<IssuedToken, ServiceError> {
        let plan = self
            .check_derive(current, target_app_id, client_app_id, level)
            .await?;

        let parent = self
            .store
            .find_token(&current.id)
            .await?
            .ok_or(ServiceError::TokenNotFound)?;
        if parent.terminated {
            return Err(ServiceError::TokenTerminated);
        }
        if parent.is_expired_at(Utc::now()) {
            return Err(ServiceError::TokenExpired);
        }

        let event = LifecycleEvent::Derive {
            session_id: parent.session_id.clone(),
            parent_id: parent.id.clone(),
            client_app_id: plan.client_app_id.clone(),
            target_app_id: plan.target_app_id.clone(),
            level,
        };
        self.listeners.before(&event)?;

        self.store
            .claim_session_slot(&parent.session_id, Some(&plan.client_app_id))
            .await?
            .ok_or(ServiceError::SessionNotFound)?;

        let derived = NewToken {
            session_id: parent.session_id.clone(),
            user_id: parent.user_id.clone(),
            client_id: Some(plan.client_app_id.clone()),
            permissions: plan.permissions.clone(),
            level,
            parent_id: Some(parent.id.clone()),
            credential_id: None,
            index: None,
            expires_at: parent.expires_at,
            token_timeout: parent.token_timeout,
            refresh_timeout: parent.refresh_timeout,
            confidential: plan.confidential,
        };
        let issued = self
            .tokens
            .create_and_sign_token(derived, with_code, Some(&plan.target_app_id))
            .await?;

        self.listeners.after(&event, &issued.token.id);
        Ok(issued)
    }

    /// Re-sign the highest existing slot at or below `target_level` in the
    /// chain of `current`. Never mints a new slot.
    pub async fn downgrade(
        &self,
        current: &Token,
        target_level: SecurityLevel,
    ) -> Result<(Token, SignedToken), ServiceError> {
        if target_level > current.level {
            return Err(ServiceError::InvalidDowngrade);
        }
        if let Some(client_id) = &current.client_id {
            return Err(ServiceError::DerivationRestricted(client_id.clone()));
        }

        let now = Utc::now();
        let chain = self.credentials.credential_chain(&current.id).await?;
        let slot = chain
            .into_iter()
            .rev()
            .map(|link| link.token)
            .filter(|t| {
                t.is_ladder_slot()
                    && t.client_id.is_none()
                    && t.level <= target_level
                    && t.is_active_at(now)
            })
            .fold(None::<Token>, |best, t| match best {
                Some(b) if b.level >= t.level => Some(b),
                _ => Some(t),
            })
            .ok_or(ServiceError::InvalidDowngrade)?;

        let event = LifecycleEvent::Downgrade {
            session_id: current.session_id.clone(),
            from_token_id: current.id.clone(),
            level: slot.level,
        };
        self.listeners.before(&event)?;

        let signed = self.tokens.sign_token(&slot, None).await?;

        self.listeners.after(&event, &slot.id);
        Ok((slot, signed))
    }

    /// Log out: tombstone the session and every token in it.
    pub async fn terminate(&self, current: &Token) -> Result<u64, ServiceError> {
        let event = LifecycleEvent::Terminate {
            session_id: current.session_id.clone(),
        };
        self.listeners.before(&event)?;

        if !self.store.terminate_session(&current.session_id).await? {
            return Err(ServiceError::SessionNotFound);
        }
        let tokens = self
            .store
            .terminate_session_tokens(&current.session_id)
            .await?;

        self.listeners.after(&event, &current.session_id);
        tracing::info!(session_id = %current.session_id, tokens, "Session terminated");
        Ok(tokens)
    }

    fn session_timeout(&self, level: SecurityLevel, suggested: Option<i64>) -> i64 {
        self.tokens
            .timeouts()
            .resolve(TimeoutKind::Session, level, suggested)
    }

    fn ladder_slot(
        &self,
        session: &Session,
        level: SecurityLevel,
        parent_id: Option<String>,
        credential_id: Option<String>,
        index: i64,
        expires_at: chrono::DateTime<Utc>,
    ) -> NewToken {
        let timeouts = self.tokens.timeouts();
        NewToken {
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            client_id: None,
            permissions: self_scope(self.tokens.self_app_id()),
            level,
            parent_id,
            credential_id,
            index: Some(index),
            expires_at,
            token_timeout: timeouts.resolve(TimeoutKind::Jwt, level, None),
            refresh_timeout: timeouts.resolve(TimeoutKind::Refresh, level, None),
            confidential: false,
        }
    }
}
