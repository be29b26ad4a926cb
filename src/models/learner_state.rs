use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque per-learner profile blob (journey/gamification state) kept outside the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LearnerState {
    pub learner_id: String,
    pub version: u64,
    pub profile: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}
