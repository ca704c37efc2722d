use service_core::error::AppError;
use thiserror::Error;

use crate::models::{CredentialType, InvalidSecurityLevel};
use crate::permission::PermissionError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    // ==================== Validation ====================
    #[error("Invalid permission: {0}")]
    InvalidPermission(#[from] PermissionError),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid security level: {0}")]
    InvalidSecurityLevel(#[from] InvalidSecurityLevel),

    #[error("Cannot downgrade to a higher security level")]
    InvalidDowngrade,

    // ==================== Authentication ====================
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token terminated")]
    TokenTerminated,

    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("Invalid or expired exchange code")]
    InvalidExchangeCode,

    #[error("Invalid client secret")]
    InvalidClientSecret,

    #[error("Credential is exhausted or outside its validity window")]
    CredentialExhausted,

    #[error("Credential was already used in this chain")]
    CredentialReused,

    #[error("Unknown signing key: {0}")]
    UnknownSigningKey(String),

    // ==================== Authorization ====================
    #[error("Insufficient security level")]
    InsufficientSecurityLevel,

    #[error("No permission for application {0}")]
    NoPermission(String),

    #[error("Application {0} is not installed")]
    AppNotInstalled(String),

    #[error("Application {0} is disabled")]
    AppDisabled(String),

    #[error("Security level exceeds the cap of application {0}")]
    SecurityLevelExceedsApp(String),

    #[error("Token is bound to application {0}")]
    DerivationRestricted(String),

    #[error("No new {0} credential can be bound")]
    NoNewBindingAllowed(CredentialType),

    #[error("Cannot remove the last login credential")]
    LastLoginCredential,

    // ==================== State ====================
    #[error("Session not found")]
    SessionNotFound,

    #[error("Token not found")]
    TokenNotFound,

    #[error("Application {0} not found")]
    ApplicationNotFound(String),

    #[error("Credential not found")]
    CredentialNotFound,

    #[error("Credential provider {0} is not enabled")]
    ProviderNotEnabled(CredentialType),

    // ==================== Conflict ====================
    #[error("Duplicate value")]
    DuplicateValue,
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Store(_) => "database_error",
            ServiceError::Internal(_) => "internal_error",
            ServiceError::InvalidPermission(PermissionError::InvalidPath(_)) => "invalid_path",
            ServiceError::InvalidPermission(_) => "invalid_permission",
            ServiceError::InvalidPayload(_) => "invalid_payload",
            ServiceError::InvalidSecurityLevel(_) => "invalid_security_level",
            ServiceError::InvalidDowngrade => "invalid_downgrade",
            ServiceError::InvalidCredentials => "invalid_credentials",
            ServiceError::InvalidToken => "invalid_token",
            ServiceError::TokenExpired => "token_expired",
            ServiceError::TokenTerminated => "token_terminated",
            ServiceError::InvalidRefreshToken => "invalid_refresh_token",
            ServiceError::InvalidExchangeCode => "invalid_exchange_code",
            ServiceError::InvalidClientSecret => "invalid_client_secret",
            ServiceError::CredentialExhausted => "credential_exhausted",
            ServiceError::CredentialReused => "credential_reused",
            ServiceError::UnknownSigningKey(_) => "unknown_signing_key",
            ServiceError::InsufficientSecurityLevel => "insufficient_security_level",
            ServiceError::NoPermission(_) => "no_permission",
            ServiceError::AppNotInstalled(_) => "app_not_installed",
            ServiceError::AppDisabled(_) => "app_disabled",
            ServiceError::SecurityLevelExceedsApp(_) => "security_level_exceeds_app",
            ServiceError::DerivationRestricted(_) => "derivation_restricted",
            ServiceError::NoNewBindingAllowed(_) => "no_new_binding_allowed",
            ServiceError::LastLoginCredential => "last_login_credential",
            ServiceError::SessionNotFound => "session_not_found",
            ServiceError::TokenNotFound => "token_not_found",
            ServiceError::ApplicationNotFound(_) => "application_not_found",
            ServiceError::CredentialNotFound => "credential_not_found",
            ServiceError::ProviderNotEnabled(_) => "provider_not_enabled",
            ServiceError::DuplicateValue => "duplicate_value",
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(detail) => {
                tracing::debug!(detail = %detail, "Uniqueness violation");
                ServiceError::DuplicateValue
            }
            other => ServiceError::Store(other),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let code = err.code();
        let message = err.to_string();
        match err {
            ServiceError::Store(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),

            ServiceError::InvalidPermission(_)
            | ServiceError::InvalidPayload(_)
            | ServiceError::InvalidSecurityLevel(_)
            | ServiceError::InvalidDowngrade => AppError::bad_request(code, message),

            ServiceError::InvalidCredentials
            | ServiceError::InvalidToken
            | ServiceError::TokenExpired
            | ServiceError::TokenTerminated
            | ServiceError::InvalidRefreshToken
            | ServiceError::InvalidExchangeCode
            | ServiceError::InvalidClientSecret
            | ServiceError::CredentialExhausted
            | ServiceError::CredentialReused
            | ServiceError::UnknownSigningKey(_) => AppError::unauthorized(code, message),

            ServiceError::InsufficientSecurityLevel
            | ServiceError::NoPermission(_)
            | ServiceError::AppNotInstalled(_)
            | ServiceError::AppDisabled(_)
            | ServiceError::SecurityLevelExceedsApp(_)
            | ServiceError::DerivationRestricted(_)
            | ServiceError::NoNewBindingAllowed(_)
            | ServiceError::LastLoginCredential => AppError::forbidden(code, message),

            ServiceError::SessionNotFound
            | ServiceError::TokenNotFound
            | ServiceError::ApplicationNotFound(_)
            | ServiceError::CredentialNotFound
            | ServiceError::ProviderNotEnabled(_) => AppError::not_found(code, message),

            ServiceError::DuplicateValue => AppError::conflict(code, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_duplicate_store_error_becomes_conflict() {
        let err = ServiceError::from(StoreError::Duplicate("identifiers".to_string()));
        assert_eq!(err.code(), "duplicate_value");

        let app: AppError = err.into();
        assert_eq!(app.status(), StatusCode::CONFLICT);
        assert_eq!(app.code(), "duplicate_value");
    }

    #[test]
    fn test_taxonomy_statuses() {
        let cases = [
            (ServiceError::InvalidDowngrade, StatusCode::BAD_REQUEST),
            (ServiceError::CredentialExhausted, StatusCode::UNAUTHORIZED),
            (ServiceError::TokenExpired, StatusCode::UNAUTHORIZED),
            (
                ServiceError::AppNotInstalled("crm".to_string()),
                StatusCode::FORBIDDEN,
            ),
            (ServiceError::SessionNotFound, StatusCode::NOT_FOUND),
        ];

        for (err, status) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status(), status);
        }
    }

    #[test]
    fn test_invalid_path_code() {
        let err = ServiceError::from(PermissionError::InvalidPath("/**".to_string()));
        assert_eq!(err.code(), "invalid_path");
    }
}
