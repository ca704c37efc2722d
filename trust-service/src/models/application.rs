use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SecurityLevel;

/// A first- or third-party application tokens can be derived for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    /// Application id, also the app id of its permissions
    #[serde(rename = "_id")]
    pub id: String,

    pub name: String,

    /// Highest security level a token held by this application may carry
    pub max_level: SecurityLevel,

    /// Scoped permission matchers this application offers
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Permissions (compact form) it asks users to grant
    #[serde(default)]
    pub requested_permissions: Vec<String>,

    #[serde(default)]
    pub requested_claims: Vec<String>,

    /// Argon2 hash of the client secret for confidential clients
    #[serde(default)]
    pub secret_hash: Option<String>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Application {
    pub fn new(id: String, name: String, max_level: SecurityLevel) -> Self {
        Self {
            id,
            name,
            max_level,
            permissions: Vec::new(),
            requested_permissions: Vec::new(),
            requested_claims: Vec::new(),
            secret_hash: None,
            disabled: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_confidential(&self) -> bool {
        self.secret_hash.is_some()
    }
}

/// Per-(user, application) grant record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installation {
    #[serde(rename = "_id")]
    pub id: String,

    pub user_id: String,

    pub app_id: String,

    /// Granted permissions in full or compact form
    #[serde(default)]
    pub permissions: Vec<String>,

    #[serde(default)]
    pub claims: Vec<String>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Installation {
    pub fn new(user_id: String, app_id: String, permissions: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            app_id,
            permissions,
            claims: Vec::new(),
            disabled: false,
            created_at: Utc::now(),
        }
    }
}
