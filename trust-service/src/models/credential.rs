use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{optional_chrono_datetime_as_bson_datetime, SecurityLevel};

/// Credential kinds a deployment can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Password,
    Totp,
    Webauthn,
    EmailCode,
    Sso,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::Password => "password",
            CredentialType::Totp => "totp",
            CredentialType::Webauthn => "webauthn",
            CredentialType::EmailCode => "email_code",
            CredentialType::Sso => "sso",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CredentialType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "password" => Ok(CredentialType::Password),
            "totp" => Ok(CredentialType::Totp),
            "webauthn" => Ok(CredentialType::Webauthn),
            "email_code" => Ok(CredentialType::EmailCode),
            "sso" => Ok(CredentialType::Sso),
            _ => Err(format!("Invalid credential type: {}", s)),
        }
    }
}

/// A bound authentication factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "_id")]
    pub id: String,

    pub user_id: String,

    pub credential_type: CredentialType,

    /// Provider-specific secret material (hashes, seeds, public keys)
    pub secret: String,

    /// Public identifiers used to look the credential up at login
    #[serde(default)]
    pub identifiers: Vec<String>,

    pub level: SecurityLevel,

    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub valid_after: DateTime<Utc>,

    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub valid_before: DateTime<Utc>,

    /// Remaining uses
    pub use_count: i64,

    #[serde(default)]
    pub access_count: i64,

    #[serde(default, with = "optional_chrono_datetime_as_bson_datetime")]
    pub last_accessed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// What a provider hands back from `bind`; the engine decides the id and
/// persists it.
#[derive(Debug, Clone)]
pub struct CredentialDraft {
    pub secret: String,
    pub identifiers: Vec<String>,
    pub level: SecurityLevel,
    pub valid_after: DateTime<Utc>,
    pub valid_before: DateTime<Utc>,
    pub use_count: i64,
}

impl CredentialDraft {
    /// Reusable factor valid from now for `lifetime_days`.
    pub fn reusable(
        secret: String,
        identifiers: Vec<String>,
        level: SecurityLevel,
        lifetime_days: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            secret,
            identifiers,
            level,
            valid_after: now,
            valid_before: now + Duration::days(lifetime_days),
            use_count: Credential::UNLIMITED_USES,
        }
    }
}

impl Credential {
    /// Use count for factors that are not single-use
    pub const UNLIMITED_USES: i64 = i64::MAX;

    pub fn from_draft(
        id: Option<String>,
        user_id: String,
        credential_type: CredentialType,
        draft: CredentialDraft,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id,
            credential_type,
            secret: draft.secret,
            identifiers: draft.identifiers,
            level: draft.level,
            valid_after: draft.valid_after,
            valid_before: draft.valid_before,
            use_count: draft.use_count,
            access_count: 0,
            last_accessed_at: None,
            disabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the consumption guard would currently pass.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.disabled && self.valid_after <= now && now < self.valid_before && self.use_count > 0
    }
}
