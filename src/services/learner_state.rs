use chrono::{TimeZone, Utc};

use crate::database::{queries, Database};
use crate::models::LearnerState;

#[derive(Debug, thiserror::Error)]
pub enum LearnerStateError {
    #[error("learner state for {learner_id} is no longer at version {expected}")]
    VersionConflict { learner_id: String, expected: u64 },
    #[error("learner state storage failed: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("learner state is not valid JSON: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Versioned per-learner profile blobs, written with optimistic concurrency.
#[derive(Clone)]
pub struct LearnerStateStore {
    db: Database,
}

impl LearnerStateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, learner_id: &str) -> Result<Option<LearnerState>, LearnerStateError> {
        let Some(row) = self.db.with_conn(|c| queries::get_learner_state(c, learner_id))? else {
            return Ok(None);
        };
        Ok(Some(LearnerState {
            learner_id: learner_id.to_string(),
            version: row.version.max(0) as u64,
            profile: serde_json::from_str(&row.profile_json)?,
            updated_at: Utc
                .timestamp_opt(row.updated_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }))
    }

    /// Writes `profile` if the stored version is still `expected_version` (`0` creates).
    pub fn put(
        &self,
        learner_id: &str,
        expected_version: u64,
        profile: &serde_json::Value,
    ) -> Result<LearnerState, LearnerStateError> {
        let json = serde_json::to_string(profile)?;
        let now = Utc::now();
        let written = self.db.with_conn(|c| {
            queries::put_learner_state(c, learner_id, expected_version as i64, &json, now.timestamp())
        })?;
        if !written {
            log::warn!(
                "Rejected stale learner state write for {} at version {}",
                learner_id,
                expected_version
            );
            return Err(LearnerStateError::VersionConflict {
                learner_id: learner_id.to_string(),
                expected: expected_version,
            });
        }
        Ok(LearnerState {
            learner_id: learner_id.to_string(),
            version: expected_version + 1,
            profile: profile.clone(),
            updated_at: now,
        })
    }
}
