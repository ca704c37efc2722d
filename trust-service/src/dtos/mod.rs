use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Credential, CredentialType, SecurityLevel};
use crate::services::{IssuedToken, SignedToken, UnbindMode};

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    pub credential_type: CredentialType,

    /// Provider-specific payload (identifier, password, code, ...)
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Return an exchange code instead of the token itself
    #[serde(default)]
    pub with_code: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ElevateRequest {
    pub credential_type: CredentialType,

    #[validate(range(max = 4, message = "Security level must be between 0 and 4"))]
    pub level: u8,

    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default)]
    pub with_code: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DeriveRequest {
    #[validate(length(min = 1, max = 128, message = "Client application id is required"))]
    pub client_app_id: String,

    #[validate(length(min = 1, max = 128))]
    pub target_app_id: Option<String>,

    #[validate(range(max = 4, message = "Security level must be between 0 and 4"))]
    pub level: u8,

    #[serde(default)]
    pub with_code: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DowngradeRequest {
    #[validate(range(max = 4, message = "Security level must be between 0 and 4"))]
    pub level: u8,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,

    pub client_id: Option<String>,

    pub client_secret: Option<String>,

    pub target_app_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExchangeRequest {
    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,

    pub target_app_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnrollRequest {
    pub credential_type: CredentialType,

    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BindRequest {
    pub credential_type: CredentialType,

    /// Rebind this credential instead of adding a new one
    pub credential_id: Option<String>,

    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UnbindRequest {
    #[validate(length(min = 1, message = "Credential id is required"))]
    pub credential_id: String,

    #[serde(default = "default_unbind_mode")]
    pub mode: UnbindMode,

    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_unbind_mode() -> UnbindMode {
    UnbindMode::Disable
}

/// Either a signed token or, for deferred hand-off, only an exchange code.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub session_id: String,
    pub token_id: String,
    #[serde(flatten)]
    pub token: Option<SignedToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<IssuedToken> for TokenResponse {
    fn from(issued: IssuedToken) -> Self {
        let token = match issued.code {
            Some(_) => None,
            None => Some(issued.signed),
        };
        Self {
            session_id: issued.token.session_id,
            token_id: issued.token.id,
            token,
            code: issued.code,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    pub credential_id: String,
    pub user_id: String,
    pub credential_type: CredentialType,
    pub level: SecurityLevel,
    pub identifiers: Vec<String>,
    pub valid_before: DateTime<Utc>,
}

impl From<Credential> for CredentialResponse {
    fn from(credential: Credential) -> Self {
        Self {
            credential_id: credential.id,
            user_id: credential.user_id,
            credential_type: credential.credential_type,
            level: credential.level,
            identifiers: credential.identifiers,
            valid_before: credential.valid_before,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub session_id: String,
    pub terminated_tokens: u64,
}
