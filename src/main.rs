use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use learner_dashboard::commands::build_router;
use learner_dashboard::database::Database;
use learner_dashboard::services::{start_cache_maintenance, CoordinatorEvent, SourceCache};
use learner_dashboard::utils::config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Arc::new(config::load_settings(&config::config_path())?);
    let db = Database::open(Path::new(&settings.storage.db_path))?;
    let state = learner_dashboard::build_app_state(settings.clone(), db.clone())?;

    if settings.storage.cache_enabled {
        start_cache_maintenance(SourceCache::new(db), settings.storage.cache_retention_days);
    }
    state.coordinator.start_maintenance();

    let mut events = state.coordinator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CoordinatorEvent::SessionExpired { email }) => {
                    log::warn!("Session expired for {}, refresh stopped until next sign-in", email)
                }
                Ok(CoordinatorEvent::Refreshed { email, kind }) => {
                    log::debug!("Refreshed {} for {}", kind.as_str(), email)
                }
                Err(RecvError::Lagged(skipped)) => log::debug!("Skipped {} coordinator events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&settings.server.bind_addr).await?;
    log::info!(
        "Learner dashboard listening on {} ({:?} mode)",
        settings.server.bind_addr,
        settings.mode
    );
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
