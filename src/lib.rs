pub mod commands;
pub mod database;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use commands::AppState;
use database::Database;
use models::{DataMode, Settings};
use services::{
    Aggregator, DemoUpstream, FetchPolicy, HttpUpstreamClient, LearnerStateStore,
    RecommendationEngine, RefreshCoordinator, SourceCache, SourceFetchers, UpstreamClient,
};

/// Wires the upstream, fetchers, aggregator, engine and coordinator for `settings`.
pub fn build_app_state(settings: Arc<Settings>, db: Database) -> anyhow::Result<AppState> {
    let upstream: Arc<dyn UpstreamClient> = match settings.mode {
        DataMode::Live => {
            if settings.upstream.api_key.is_empty() {
                log::warn!("No upstream API key configured, requests will be unauthenticated");
            }
            Arc::new(HttpUpstreamClient::new(&settings.upstream)?)
        }
        DataMode::Demo => {
            log::info!("Serving the built-in demo dataset");
            Arc::new(DemoUpstream::new())
        }
    };

    let cache = settings
        .storage
        .cache_enabled
        .then(|| SourceCache::new(db.clone()));
    let fetchers = SourceFetchers::new(upstream, FetchPolicy::from_settings(&settings.upstream), cache);
    let aggregator = Aggregator::new(
        fetchers,
        settings.mode,
        settings.recommendations.default_timezone.clone(),
    );
    let coordinator = RefreshCoordinator::new(
        Arc::new(aggregator),
        RecommendationEngine::new(settings.recommendations.clone()),
        settings.refresh.clone(),
    );

    Ok(AppState {
        coordinator,
        learner_state: LearnerStateStore::new(db),
        settings,
    })
}
