pub mod dashboard;
pub mod learner_state;
pub mod recommendations;

use std::sync::{Arc, OnceLock};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use regex::Regex;
use serde_json::json;

use crate::models::Settings;
use crate::services::{AggregateError, LearnerStateError, LearnerStateStore, RefreshCoordinator};

pub const LEARNER_EMAIL_HEADER: &str = "x-learner-email";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: RefreshCoordinator,
    pub learner_state: LearnerStateStore,
    pub settings: Arc<Settings>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/dashboard/real-data", get(dashboard::get_real_data))
        .route(
            "/api/dashboard/refresh",
            axum::routing::post(dashboard::refresh_dashboard).delete(dashboard::close_dashboard),
        )
        .route("/api/recommendations", get(recommendations::get_recommendations))
        .route(
            "/api/learners/:id/state",
            get(learner_state::get_learner_state).put(learner_state::put_learner_state),
        )
        .with_state(state)
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "mode": state.settings.mode,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `{ error, code }` failure body with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn invalid_session() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "INVALID_SESSION",
            "Session expired or invalid, please sign in again",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message, "code": self.code }));
        (self.status, body).into_response()
    }
}

impl From<AggregateError> for ApiError {
    fn from(error: AggregateError) -> Self {
        match error {
            AggregateError::Unauthorized => ApiError::invalid_session(),
            AggregateError::LearnerNotFound { .. } => {
                ApiError::new(StatusCode::NOT_FOUND, "LEARNER_NOT_FOUND", error.to_string())
            }
            AggregateError::Cancelled => ApiError::internal(error.to_string()),
        }
    }
}

impl From<LearnerStateError> for ApiError {
    fn from(error: LearnerStateError) -> Self {
        match error {
            LearnerStateError::VersionConflict { .. } => {
                ApiError::new(StatusCode::CONFLICT, "VERSION_CONFLICT", error.to_string())
            }
            LearnerStateError::Storage(e) => {
                log::error!("Learner state storage failure: {}", e);
                ApiError::internal("learner state storage failed")
            }
            LearnerStateError::Encoding(e) => ApiError::internal(e.to_string()),
        }
    }
}

fn email_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
}

pub fn validate_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim();
    if email.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "MISSING_EMAIL",
            "A learner email is required",
        ));
    }
    let valid = match email_pattern() {
        Some(pattern) => pattern.is_match(email),
        None => email.contains('@'),
    };
    if !valid {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_EMAIL",
            format!("'{}' is not a valid email address", email),
        ));
    }
    Ok(email.to_lowercase())
}

/// Learner email from the session header, falling back to the `email` query parameter.
pub fn learner_email(headers: &HeaderMap, query: Option<&str>) -> Result<String, ApiError> {
    let from_header = headers
        .get(LEARNER_EMAIL_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty());
    validate_email(from_header.or(query).unwrap_or_default())
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(LEARNER_EMAIL_HEADER, HeaderValue::from_static("Asha@Example.com"));
        assert_eq!(
            learner_email(&headers, Some("other@example.com")).expect("email"),
            "asha@example.com"
        );
        assert_eq!(
            learner_email(&HeaderMap::new(), Some("other@example.com")).expect("email"),
            "other@example.com"
        );
    }

    #[test]
    fn missing_and_malformed_emails_are_rejected() {
        let missing = learner_email(&HeaderMap::new(), None).expect_err("missing");
        assert_eq!(missing.code, "MISSING_EMAIL");
        assert_eq!(missing.status, StatusCode::BAD_REQUEST);
        let malformed = validate_email("not-an-email").expect_err("invalid");
        assert_eq!(malformed.code, "INVALID_EMAIL");
    }

    #[test]
    fn aggregate_errors_map_to_codes() {
        let unauthorized = ApiError::from(AggregateError::Unauthorized);
        assert_eq!(unauthorized.status, StatusCode::UNAUTHORIZED);
        assert_eq!(unauthorized.code, "INVALID_SESSION");
        let missing = ApiError::from(AggregateError::LearnerNotFound {
            email: "a@example.com".to_string(),
        });
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }
}
