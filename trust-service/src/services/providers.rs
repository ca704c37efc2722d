use async_trait::async_trait;
use serde::Deserialize;
use validator::Validate;

use super::credential::{CredentialContext, CredentialProvider, LoginOutcome, VerifyOutcome};
use super::ServiceError;
use crate::config::PasswordProviderConfig;
use crate::models::{Credential, CredentialDraft, CredentialType, SecurityLevel};
use crate::utils::{hash_secret, verify_secret, PlainSecret};

#[derive(Debug, Deserialize, Validate)]
struct PasswordLogin {
    #[validate(length(min = 1, max = 254))]
    identifier: String,
    #[validate(length(min = 1, max = 1024))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct PasswordCheck {
    #[validate(length(min = 1, max = 1024))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct PasswordBinding {
    #[validate(length(min = 1, max = 254))]
    identifier: String,
    #[validate(length(min = 8, max = 1024))]
    password: String,
}

fn parse_payload<T>(payload: &serde_json::Value) -> Result<T, ServiceError>
where
    T: for<'de> Deserialize<'de> + Validate,
{
    let value: T = serde_json::from_value(payload.clone())
        .map_err(|e| ServiceError::InvalidPayload(e.to_string()))?;
    value
        .validate()
        .map_err(|e| ServiceError::InvalidPayload(e.to_string()))?;
    Ok(value)
}

fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Identifier + password factor. A user holds at most one.
pub struct PasswordProvider {
    config: PasswordProviderConfig,
}

impl PasswordProvider {
    pub fn new(config: PasswordProviderConfig) -> Self {
        Self { config }
    }

    async fn user_password(
        ctx: &CredentialContext<'_>,
        user_id: &str,
    ) -> Result<Option<Credential>, ServiceError> {
        Ok(ctx
            .store
            .find_user_credentials(user_id)
            .await?
            .into_iter()
            .find(|c| c.credential_type == CredentialType::Password && !c.disabled))
    }
}

fn check_password(password: &str, credential: &Credential) -> Result<(), ServiceError> {
    if verify_secret(&PlainSecret::new(password), &credential.secret)? {
        Ok(())
    } else {
        Err(ServiceError::InvalidCredentials)
    }
}

#[async_trait]
impl CredentialProvider for PasswordProvider {
    fn credential_type(&self) -> CredentialType {
        CredentialType::Password
    }

    fn supports_login(&self) -> bool {
        true
    }

    async fn login(
        &self,
        ctx: &CredentialContext<'_>,
        payload: &serde_json::Value,
    ) -> Result<LoginOutcome, ServiceError> {
        let request: PasswordLogin = parse_payload(payload)?;

        let credential = ctx
            .store
            .find_credential_by_identifier(
                CredentialType::Password,
                &normalize_identifier(&request.identifier),
            )
            .await?
            .filter(|c| !c.disabled)
            .ok_or(ServiceError::InvalidCredentials)?;
        check_password(&request.password, &credential)?;

        Ok(LoginOutcome {
            user_id: credential.user_id,
            credential_id: credential.id,
            level: credential.level,
            expires_in: None,
        })
    }

    async fn verify(
        &self,
        ctx: &CredentialContext<'_>,
        user_id: &str,
        _target_level: SecurityLevel,
        payload: &serde_json::Value,
    ) -> Result<VerifyOutcome, ServiceError> {
        let request: PasswordCheck = parse_payload(payload)?;

        let credential = Self::user_password(ctx, user_id)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;
        check_password(&request.password, &credential)?;

        Ok(VerifyOutcome {
            credential_id: credential.id,
            level: credential.level,
            expires_in: None,
        })
    }

    async fn bind(
        &self,
        _ctx: &CredentialContext<'_>,
        _user_id: &str,
        _credential_id: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<CredentialDraft, ServiceError> {
        let request: PasswordBinding = parse_payload(payload)?;
        let hash = hash_secret(&PlainSecret::new(request.password))?;

        Ok(CredentialDraft::reusable(
            hash,
            vec![normalize_identifier(&request.identifier)],
            self.config.security_level,
            self.config.lifetime_days,
        ))
    }

    async fn can_bind_new(
        &self,
        ctx: &CredentialContext<'_>,
        user_id: &str,
    ) -> Result<bool, ServiceError> {
        Ok(Self::user_password(ctx, user_id).await?.is_none())
    }
}
