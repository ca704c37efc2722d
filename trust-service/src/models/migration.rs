use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::optional_chrono_datetime_as_bson_datetime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    InProgress,
    Complete,
}

/// Marker document for one migration step. The unique `_id` makes the
/// insert that creates it the lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationMarker {
    #[serde(rename = "_id")]
    pub step: String,

    pub state: MigrationState,

    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub started_at: DateTime<Utc>,

    #[serde(default, with = "optional_chrono_datetime_as_bson_datetime")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationMarker {
    pub fn started(step: &str) -> Self {
        Self {
            step: step.to_string(),
            state: MigrationState::InProgress,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}
