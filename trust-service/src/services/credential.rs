//! Credential engine: provider registry, chain blacklist, atomic
//! consumption, and the bind/unbind guards.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::events::{LifecycleEvent, Listeners};
use super::providers::PasswordProvider;
use super::ServiceError;
use crate::config::CredentialsConfig;
use crate::models::{Credential, CredentialDraft, CredentialType, SecurityLevel, Token};
use crate::store::Store;

/// Longest parent chain walked before giving up on a corrupt store
const MAX_CHAIN_DEPTH: usize = 64;

/// What a provider sees while handling a request.
pub struct CredentialContext<'a> {
    pub store: &'a dyn Store,
    /// Credential ids already spent in the caller's chain
    pub blacklist: &'a HashSet<String>,
    /// Security level of the caller's token; `MIN` for logins
    pub level: SecurityLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub user_id: String,
    pub credential_id: String,
    pub level: SecurityLevel,
    /// Suggested session lifetime in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub credential_id: String,
    pub level: SecurityLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnbindMode {
    Delete,
    Disable,
}

/// One ancestor step: the token and the credential spent to mint it.
#[derive(Debug, Clone)]
pub struct ChainLink {
    pub token: Token,
    pub credential: Option<Credential>,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn credential_type(&self) -> CredentialType;

    fn supports_login(&self) -> bool {
        false
    }

    async fn login(
        &self,
        _ctx: &CredentialContext<'_>,
        _payload: &serde_json::Value,
    ) -> Result<LoginOutcome, ServiceError> {
        Err(ServiceError::InvalidPayload(format!(
            "{} credentials cannot be used to log in",
            self.credential_type()
        )))
    }

    async fn verify(
        &self,
        ctx: &CredentialContext<'_>,
        user_id: &str,
        target_level: SecurityLevel,
        payload: &serde_json::Value,
    ) -> Result<VerifyOutcome, ServiceError>;

    /// Build the credential to persist; the engine stores it.
    async fn bind(
        &self,
        ctx: &CredentialContext<'_>,
        user_id: &str,
        credential_id: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<CredentialDraft, ServiceError>;

    async fn unbind(
        &self,
        _ctx: &CredentialContext<'_>,
        _user_id: &str,
        _credential: &Credential,
        _payload: &serde_json::Value,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Whether the user holds an enabled, unspent credential of this type
    /// at `target_level` or above.
    async fn can_elevate(
        &self,
        ctx: &CredentialContext<'_>,
        user_id: &str,
        target_level: SecurityLevel,
    ) -> Result<bool, ServiceError> {
        let credentials = ctx.store.find_user_credentials(user_id).await?;
        Ok(credentials.iter().any(|c| {
            c.credential_type == self.credential_type()
                && !c.disabled
                && !ctx.blacklist.contains(&c.id)
                && c.level >= target_level
        }))
    }

    async fn can_bind_new(
        &self,
        _ctx: &CredentialContext<'_>,
        _user_id: &str,
    ) -> Result<bool, ServiceError> {
        Ok(true)
    }
}

/// Enabled providers, one per credential type, fixed at startup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<CredentialType, Arc<dyn CredentialProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CredentialsConfig) -> Self {
        let mut registry = Self::new();
        if config.password.enabled {
            registry = registry.register(Arc::new(PasswordProvider::new(config.password.clone())));
        }
        registry
    }

    pub fn register(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.providers.insert(provider.credential_type(), provider);
        self
    }

    pub fn get(&self, credential_type: CredentialType) -> Result<&Arc<dyn CredentialProvider>, ServiceError> {
        self.providers
            .get(&credential_type)
            .ok_or(ServiceError::ProviderNotEnabled(credential_type))
    }

    pub fn enabled_types(&self) -> Vec<CredentialType> {
        self.providers.keys().copied().collect()
    }

    fn supports_login(&self, credential_type: CredentialType) -> bool {
        self.providers
            .get(&credential_type)
            .is_some_and(|p| p.supports_login())
    }
}

#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn Store>,
    registry: ProviderRegistry,
    listeners: Listeners,
}

impl CredentialService {
    pub fn new(store: Arc<dyn Store>, registry: ProviderRegistry, listeners: Listeners) -> Self {
        Self {
            store,
            registry,
            listeners,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Ancestors of `token_id`, root first, each with its credential.
    pub async fn credential_chain(&self, token_id: &str) -> Result<Vec<ChainLink>, ServiceError> {
        let mut chain = Vec::new();
        let mut next = Some(token_id.to_string());

        while let Some(id) = next {
            if chain.len() >= MAX_CHAIN_DEPTH {
                return Err(ServiceError::Internal(anyhow::anyhow!(
                    "Token chain of {} exceeds {} links",
                    token_id,
                    MAX_CHAIN_DEPTH
                )));
            }

            let token = self
                .store
                .find_token(&id)
                .await?
                .ok_or(ServiceError::TokenNotFound)?;
            let credential = match &token.credential_id {
                Some(credential_id) => self.store.find_credential(credential_id).await?,
                None => None,
            };

            next = token.parent_id.clone();
            chain.push(ChainLink { token, credential });
        }

        chain.reverse();
        Ok(chain)
    }

    /// Credential ids spent along the chain of `token_id`, excluding the
    /// credential the session was opened with.
    pub async fn credential_blacklist(
        &self,
        token_id: &str,
        credential_type: Option<CredentialType>,
    ) -> Result<HashSet<String>, ServiceError> {
        let chain = self.credential_chain(token_id).await?;
        let Some((root, rest)) = chain.split_first() else {
            return Ok(HashSet::new());
        };
        let root_credential = root.token.credential_id.as_deref();

        let mut blacklist = HashSet::new();
        for link in rest {
            let Some(credential_id) = link.token.credential_id.as_deref() else {
                continue;
            };
            if Some(credential_id) == root_credential {
                continue;
            }
            let type_matches = match credential_type {
                None => true,
                Some(wanted) => link
                    .credential
                    .as_ref()
                    .is_some_and(|c| c.credential_type == wanted),
            };
            if type_matches {
                blacklist.insert(credential_id.to_string());
            }
        }
        Ok(blacklist)
    }

    /// Spend one use of a credential. Exactly one of any set of concurrent
    /// callers wins the last use.
    pub async fn check_credential_use(&self, credential_id: &str) -> Result<Credential, ServiceError> {
        let credential = self
            .store
            .consume_credential(credential_id, Utc::now())
            .await?
            .ok_or_else(|| {
                tracing::warn!(credential_id = %credential_id, "Credential use rejected");
                ServiceError::CredentialExhausted
            })?;

        self.listeners.after(
            &LifecycleEvent::CredentialConsumed {
                credential_id: credential_id.to_string(),
            },
            credential_id,
        );
        Ok(credential)
    }

    /// Authenticate a user from scratch through a login-capable provider.
    pub async fn login(
        &self,
        credential_type: CredentialType,
        payload: &serde_json::Value,
    ) -> Result<LoginOutcome, ServiceError> {
        let provider = self.registry.get(credential_type)?;
        if !provider.supports_login() {
            return Err(ServiceError::InvalidPayload(format!(
                "{} credentials cannot be used to log in",
                credential_type
            )));
        }

        let blacklist = HashSet::new();
        let ctx = CredentialContext {
            store: self.store.as_ref(),
            blacklist: &blacklist,
            level: SecurityLevel::MIN,
        };
        let outcome = provider.login(&ctx, payload).await?;
        self.check_credential_use(&outcome.credential_id).await?;

        Ok(outcome)
    }

    /// Step-up check for the holder of `token`: the credential must not
    /// have been spent earlier in this chain.
    pub async fn verify(
        &self,
        token: &Token,
        credential_type: CredentialType,
        target_level: SecurityLevel,
        payload: &serde_json::Value,
    ) -> Result<VerifyOutcome, ServiceError> {
        let provider = self.registry.get(credential_type)?;
        let blacklist = self
            .credential_blacklist(&token.id, Some(credential_type))
            .await?;
        let ctx = CredentialContext {
            store: self.store.as_ref(),
            blacklist: &blacklist,
            level: token.level,
        };

        if !provider.can_elevate(&ctx, &token.user_id, target_level).await? {
            return Err(ServiceError::InsufficientSecurityLevel);
        }

        let outcome = provider
            .verify(&ctx, &token.user_id, target_level, payload)
            .await?;
        if blacklist.contains(&outcome.credential_id) {
            tracing::warn!(
                credential_id = %outcome.credential_id,
                token_id = %token.id,
                "Credential reuse within chain"
            );
            return Err(ServiceError::CredentialReused);
        }
        if outcome.level < target_level {
            return Err(ServiceError::InsufficientSecurityLevel);
        }

        self.check_credential_use(&outcome.credential_id).await?;
        Ok(outcome)
    }

    /// Create a brand-new user holding one login credential.
    pub async fn enroll(
        &self,
        credential_type: CredentialType,
        payload: &serde_json::Value,
    ) -> Result<Credential, ServiceError> {
        let provider = self.registry.get(credential_type)?;
        if !provider.supports_login() {
            return Err(ServiceError::InvalidPayload(format!(
                "{} credentials cannot be used to log in",
                credential_type
            )));
        }

        let user_id = uuid::Uuid::new_v4().to_string();
        let blacklist = HashSet::new();
        let ctx = CredentialContext {
            store: self.store.as_ref(),
            blacklist: &blacklist,
            level: SecurityLevel::MIN,
        };
        let draft = provider.bind(&ctx, &user_id, None, payload).await?;

        let event = LifecycleEvent::CredentialBound {
            user_id: user_id.clone(),
            credential_type,
            level: draft.level,
        };
        self.listeners.before(&event)?;

        let credential = Credential::from_draft(None, user_id, credential_type, draft);
        self.store.upsert_credential(&credential).await?;
        self.listeners.after(&event, &credential.id);

        tracing::info!(user_id = %credential.user_id, credential_type = %credential_type, "User enrolled");
        Ok(credential)
    }

    /// Attach (or rebind) a credential to the holder of `token`.
    pub async fn bind_credential(
        &self,
        token: &Token,
        credential_type: CredentialType,
        credential_id: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<Credential, ServiceError> {
        let provider = self.registry.get(credential_type)?;
        let user_id = token.user_id.as_str();
        let blacklist = HashSet::new();
        let ctx = CredentialContext {
            store: self.store.as_ref(),
            blacklist: &blacklist,
            level: token.level,
        };

        let existing = match credential_id {
            Some(id) => {
                let credential = self
                    .store
                    .find_credential(id)
                    .await?
                    .filter(|c| c.user_id == user_id && c.credential_type == credential_type)
                    .ok_or(ServiceError::CredentialNotFound)?;
                Some(credential)
            }
            None => {
                if !provider.can_bind_new(&ctx, user_id).await? {
                    return Err(ServiceError::NoNewBindingAllowed(credential_type));
                }
                None
            }
        };

        let draft = provider.bind(&ctx, user_id, credential_id, payload).await?;

        let highest = self
            .store
            .find_user_credentials(user_id)
            .await?
            .into_iter()
            .filter(|c| !c.disabled)
            .map(|c| c.level)
            .max();
        let required = highest.map_or(SecurityLevel::MIN, |h| h.min(draft.level));
        if token.level < required {
            return Err(ServiceError::InsufficientSecurityLevel);
        }

        let event = LifecycleEvent::CredentialBound {
            user_id: user_id.to_string(),
            credential_type,
            level: draft.level,
        };
        self.listeners.before(&event)?;

        let mut credential = Credential::from_draft(
            credential_id.map(str::to_string),
            user_id.to_string(),
            credential_type,
            draft,
        );
        if let Some(previous) = existing {
            credential.created_at = previous.created_at;
            credential.access_count = previous.access_count;
            credential.last_accessed_at = previous.last_accessed_at;
        }
        self.store.upsert_credential(&credential).await?;
        self.listeners.after(&event, &credential.id);

        Ok(credential)
    }

    /// Remove or disable a credential of the holder of `token`.
    pub async fn unbind_credential(
        &self,
        token: &Token,
        credential_id: &str,
        mode: UnbindMode,
        payload: &serde_json::Value,
    ) -> Result<(), ServiceError> {
        let user_id = token.user_id.as_str();
        let credential = self
            .store
            .find_credential(credential_id)
            .await?
            .filter(|c| c.user_id == user_id)
            .ok_or(ServiceError::CredentialNotFound)?;
        let provider = self.registry.get(credential.credential_type)?;

        let remaining_logins = self
            .store
            .find_user_credentials(user_id)
            .await?
            .iter()
            .filter(|c| {
                c.id != credential.id && !c.disabled && self.registry.supports_login(c.credential_type)
            })
            .count();
        if remaining_logins == 0 {
            return Err(ServiceError::LastLoginCredential);
        }

        if mode == UnbindMode::Delete && token.level < credential.level {
            return Err(ServiceError::InsufficientSecurityLevel);
        }

        let event = LifecycleEvent::CredentialUnbound {
            user_id: user_id.to_string(),
            credential_id: credential.id.clone(),
            deleted: mode == UnbindMode::Delete,
        };
        self.listeners.before(&event)?;

        let blacklist = HashSet::new();
        let ctx = CredentialContext {
            store: self.store.as_ref(),
            blacklist: &blacklist,
            level: token.level,
        };
        provider.unbind(&ctx, user_id, &credential, payload).await?;

        let changed = match mode {
            UnbindMode::Delete => self.store.delete_credential(&credential.id).await?,
            UnbindMode::Disable => self.store.disable_credential(&credential.id).await?,
        };
        if !changed {
            return Err(ServiceError::CredentialNotFound);
        }

        self.listeners.after(&event, &credential.id);
        Ok(())
    }
}
