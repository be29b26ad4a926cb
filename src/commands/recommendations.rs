use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use super::{learner_email, ApiError, AppState};
use crate::models::{RecommendationProfile, RecommendationSet};
use crate::services::{AggregateError, RefreshKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationQuery {
    pub email: Option<String>,
    /// Milliseconds between scheduled refreshes.
    pub refresh_interval: Option<u64>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub refresh: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for RecommendationQuery {
    fn default() -> Self {
        Self {
            email: None,
            refresh_interval: None,
            enabled: true,
            refresh: false,
        }
    }
}

fn empty_set(error: Option<String>) -> RecommendationSet {
    RecommendationSet {
        recommendations: Vec::new(),
        learner_profile: RecommendationProfile::default(),
        generated_at: Utc::now(),
        error,
    }
}

pub async fn get_recommendations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RecommendationQuery>,
) -> Result<Response, ApiError> {
    if !query.enabled {
        if let Ok(email) = learner_email(&headers, query.email.as_deref()) {
            state.coordinator.cancel(&email, RefreshKind::Recommendations);
        }
        return Ok(Json(empty_set(None)).into_response());
    }

    let email = learner_email(&headers, query.email.as_deref())?;
    let interval = query
        .refresh_interval
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.coordinator.default_interval(RefreshKind::Recommendations));

    match state
        .coordinator
        .recommendations_within(&email, interval, query.refresh)
        .await
    {
        Ok(set) => {
            state.coordinator.schedule(&email, RefreshKind::Recommendations, interval);
            Ok(Json(&*set).into_response())
        }
        Err(AggregateError::Unauthorized) => Err(ApiError::invalid_session()),
        Err(e) => {
            log::warn!("Recommendations for {} unavailable: {}", email, e);
            Ok(Json(empty_set(Some(e.to_string()))).into_response())
        }
    }
}
