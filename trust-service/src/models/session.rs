use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client environment captured when the session was opened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionEnvironment {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Anchor of a user's continuous authentication lifetime.
///
/// Holds the ladder of security-level tokens; never deleted, only
/// tombstoned through `terminated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "_id")]
    pub id: String,

    pub user_id: String,

    /// Next free slot index
    pub token_count: i64,

    /// Applications tokens were derived into
    #[serde(default)]
    pub authorized_apps: Vec<String>,

    #[serde(default)]
    pub terminated: bool,

    /// Watermark: latest expiry of any token issued in this session
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,

    #[serde(default)]
    pub environment: SessionEnvironment,

    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: String, token_count: i64, environment: SessionEnvironment) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            token_count,
            authorized_apps: Vec::new(),
            terminated: false,
            expires_at: now,
            environment,
            created_at: now,
        }
    }
}
