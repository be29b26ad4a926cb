use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::models::LearnerState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutLearnerState {
    #[serde(default)]
    pub expected_version: u64,
    pub profile: serde_json::Value,
}

pub async fn get_learner_state(
    State(state): State<AppState>,
    Path(learner_id): Path<String>,
) -> Result<Json<LearnerState>, ApiError> {
    match state.learner_state.get(&learner_id)? {
        Some(stored) => Ok(Json(stored)),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "LEARNER_NOT_FOUND",
            format!("no stored state for learner {}", learner_id),
        )),
    }
}

pub async fn put_learner_state(
    State(state): State<AppState>,
    Path(learner_id): Path<String>,
    Json(body): Json<PutLearnerState>,
) -> Result<Json<LearnerState>, ApiError> {
    let stored = state
        .learner_state
        .put(&learner_id, body.expected_version, &body.profile)?;
    Ok(Json(stored))
}
