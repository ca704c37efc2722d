use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{optional_chrono_datetime_as_bson_datetime, SecurityLevel};

/// A unit of trust inside a session.
///
/// Ladder tokens occupy a slot (`index`) in their session; derived tokens
/// hang off a ladder token through `parent_id` and have no slot. Tokens are
/// never deleted; `terminated` is a tombstone every read must honour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    #[serde(rename = "_id")]
    pub id: String,

    pub session_id: String,

    pub user_id: String,

    /// Application this token is bound to, if derived for a client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Compact permission strings (`appId/path?query`)
    pub permissions: Vec<String>,

    pub level: SecurityLevel,

    #[serde(default)]
    pub parent_id: Option<String>,

    /// Credential spent to mint this token
    #[serde(default)]
    pub credential_id: Option<String>,

    /// Ladder slot; absent for derived tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,

    /// Absolute expiry; never later than the parent's
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,

    #[serde(default, with = "optional_chrono_datetime_as_bson_datetime")]
    pub jwt_expires_at: Option<DateTime<Utc>>,

    /// JWT lifetime in seconds
    pub token_timeout: i64,

    /// Refresh artifact lifetime in seconds
    pub refresh_timeout: i64,

    /// Refreshing requires the client secret when a client id is presented
    #[serde(default)]
    pub confidential: bool,

    #[serde(default)]
    pub exchange_code_hash: Option<String>,

    #[serde(default, with = "optional_chrono_datetime_as_bson_datetime")]
    pub exchange_code_expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub refresh_token_hash: Option<String>,

    #[serde(default, with = "optional_chrono_datetime_as_bson_datetime")]
    pub refresh_expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub issued_count: i64,

    #[serde(default, with = "optional_chrono_datetime_as_bson_datetime")]
    pub last_issued_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub terminated: bool,

    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// Fields a caller decides when minting a token.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub session_id: String,
    pub user_id: String,
    pub client_id: Option<String>,
    pub permissions: Vec<String>,
    pub level: SecurityLevel,
    pub parent_id: Option<String>,
    pub credential_id: Option<String>,
    pub index: Option<i64>,
    pub expires_at: DateTime<Utc>,
    pub token_timeout: i64,
    pub refresh_timeout: i64,
    pub confidential: bool,
}

impl From<NewToken> for Token {
    fn from(new: NewToken) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: new.session_id,
            user_id: new.user_id,
            client_id: new.client_id,
            permissions: new.permissions,
            level: new.level,
            parent_id: new.parent_id,
            credential_id: new.credential_id,
            index: new.index,
            expires_at: new.expires_at,
            jwt_expires_at: None,
            token_timeout: new.token_timeout,
            refresh_timeout: new.refresh_timeout,
            confidential: new.confidential,
            exchange_code_hash: None,
            exchange_code_expires_at: None,
            refresh_token_hash: None,
            refresh_expires_at: None,
            issued_count: 0,
            last_issued_at: None,
            terminated: false,
            created_at: Utc::now(),
        }
    }
}

impl Token {
    /// Hash a single-use artifact (refresh token, exchange code) using SHA-256
    pub fn hash_secret(value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Not terminated and not past its absolute expiry
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.terminated && !self.is_expired_at(now)
    }

    pub fn is_ladder_slot(&self) -> bool {
        self.index.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> Token {
        Token::from(NewToken {
            session_id: "session_1".to_string(),
            user_id: "user_1".to_string(),
            client_id: None,
            permissions: vec!["self/*".to_string()],
            level: SecurityLevel::MIN,
            parent_id: None,
            credential_id: None,
            index: Some(0),
            expires_at: Utc::now() + Duration::hours(1),
            token_timeout: 600,
            refresh_timeout: 3600,
            confidential: false,
        })
    }

    #[test]
    fn test_activity() {
        let mut token = sample();
        let now = Utc::now();
        assert!(token.is_active_at(now));
        assert!(!token.is_active_at(now + Duration::hours(2)));

        token.terminated = true;
        assert!(!token.is_active_at(now));
    }

    #[test]
    fn test_hash_secret() {
        let hash = Token::hash_secret("refresh_abc");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, "refresh_abc");
        assert_eq!(hash, Token::hash_secret("refresh_abc"));
    }
}
