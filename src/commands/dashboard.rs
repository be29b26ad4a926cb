use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{learner_email, ApiError, AppState};
use crate::models::{DashboardSnapshot, SourceDegradation};
use crate::services::RefreshKind;

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    pub email: Option<String>,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseMetadata<'a> {
    cache_status: &'static str,
    fallback_data: bool,
    degraded_sources: &'a [SourceDegradation],
    request_id: String,
}

#[derive(Debug, Serialize)]
struct DashboardEnvelope<'a> {
    success: bool,
    data: &'a DashboardSnapshot,
    metadata: ResponseMetadata<'a>,
}

fn envelope(snapshot: &DashboardSnapshot) -> Response {
    let provenance = &snapshot.provenance;
    Json(DashboardEnvelope {
        success: true,
        data: snapshot,
        metadata: ResponseMetadata {
            cache_status: provenance.data_source.cache_status(),
            fallback_data: provenance.is_fallback(),
            degraded_sources: &provenance.degraded_sources,
            request_id: uuid::Uuid::new_v4().to_string(),
        },
    })
    .into_response()
}

/// Snapshot for the open dashboard; also keeps the learner's snapshot timer running.
pub async fn get_real_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DashboardQuery>,
) -> Result<Response, ApiError> {
    let email = learner_email(&headers, query.email.as_deref())?;
    let snapshot = state.coordinator.snapshot(&email, query.refresh).await?;
    state.coordinator.schedule(
        &email,
        RefreshKind::Snapshot,
        state.coordinator.default_interval(RefreshKind::Snapshot),
    );
    log::info!(
        "Served dashboard for {} ({})",
        email,
        snapshot.provenance.data_source.cache_status()
    );
    Ok(envelope(&snapshot))
}

/// Manual refresh of both kinds; recommendation failures do not fail the snapshot.
pub async fn refresh_dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DashboardQuery>,
) -> Result<Response, ApiError> {
    let email = learner_email(&headers, query.email.as_deref())?;
    let (snapshot, recommendations) = tokio::join!(
        state.coordinator.snapshot(&email, true),
        state.coordinator.recommendations(&email, true),
    );
    let snapshot = snapshot?;
    if let Err(e) = recommendations {
        log::warn!("Recommendation refresh for {} failed: {}", email, e);
    }
    Ok(envelope(&snapshot))
}

/// Dashboard closed: stop both timers and any in-flight work.
pub async fn close_dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = learner_email(&headers, query.email.as_deref())?;
    state.coordinator.cancel_all(&email);
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::{HeaderValue, StatusCode};

    use crate::commands::test_support::{app_state, body_json};
    use crate::commands::LEARNER_EMAIL_HEADER;
    use crate::models::SourceKind;
    use crate::services::testing::{self, FakeUpstream};
    use crate::services::UpstreamError;

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LEARNER_EMAIL_HEADER, HeaderValue::from_static(testing::EMAIL));
        headers
    }

    #[tokio::test(start_paused = true)]
    async fn real_data_returns_envelope_and_schedules_refresh() {
        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        let state = app_state(&upstream);

        let response = get_real_data(State(state.clone()), headers(), Query(DashboardQuery::default()))
            .await
            .expect("dashboard");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["metadata"]["cacheStatus"], "real-data-from-graphy");
        assert_eq!(body["metadata"]["fallbackData"], false);
        assert_eq!(body["data"]["summary"]["totalCourses"], 2);
        assert_eq!(
            state.coordinator.active_timers(testing::EMAIL),
            vec![RefreshKind::Snapshot]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_source_is_reported_as_fallback() {
        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        upstream.fail_always(SourceKind::Transactions, UpstreamError::status(503));
        let state = app_state(&upstream);

        let response = get_real_data(State(state), headers(), Query(DashboardQuery::default()))
            .await
            .expect("dashboard");
        let body = body_json(response).await;
        assert_eq!(body["metadata"]["cacheStatus"], "fallback");
        assert_eq!(body["metadata"]["fallbackData"], true);
        assert_eq!(body["metadata"]["degradedSources"][0]["source"], "transactions");
        assert_eq!(body["data"]["transactions"], serde_json::json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_is_invalid_session() {
        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        upstream.fail_always(SourceKind::Profile, UpstreamError::status(401));
        let state = app_state(&upstream);

        let error = get_real_data(State(state.clone()), headers(), Query(DashboardQuery::default()))
            .await
            .expect_err("unauthorized");
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["code"], "INVALID_SESSION");
        assert!(state.coordinator.active_timers(testing::EMAIL).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_timers() {
        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        let state = app_state(&upstream);
        get_real_data(State(state.clone()), headers(), Query(DashboardQuery::default()))
            .await
            .expect("dashboard");

        close_dashboard(State(state.clone()), headers(), Query(DashboardQuery::default()))
            .await
            .expect("closed");
        assert!(state.coordinator.active_timers(testing::EMAIL).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_refresh_bypasses_the_cached_snapshot() {
        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        let state = app_state(&upstream);
        get_real_data(State(state.clone()), headers(), Query(DashboardQuery::default()))
            .await
            .expect("dashboard");
        get_real_data(State(state.clone()), headers(), Query(DashboardQuery::default()))
            .await
            .expect("cached");
        assert_eq!(upstream.calls(SourceKind::Profile), 1);

        refresh_dashboard(State(state.clone()), headers(), Query(DashboardQuery::default()))
            .await
            .expect("refreshed");
        assert_eq!(upstream.calls(SourceKind::Profile), 2);
        assert!(state.coordinator.latest_recommendations(testing::EMAIL).is_some());
    }
}
