use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::models::{DataMode, Settings};

const ENV_CONFIG_PATH: &str = "LEARNER_DASHBOARD_CONFIG";
const ENV_API_KEY: &str = "UPSTREAM_API_KEY";
const ENV_BASE_URL: &str = "UPSTREAM_BASE_URL";
const ENV_MODE: &str = "DASHBOARD_MODE";
const ENV_BIND_ADDR: &str = "DASHBOARD_BIND_ADDR";
const ENV_DB_PATH: &str = "DASHBOARD_DB_PATH";
const DEFAULT_CONFIG_PATH: &str = "config/settings.json";

pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn api_key_from_env() -> Option<String> {
    env_value(ENV_API_KEY)
}

pub fn resolve_api_key(explicit_key: &str) -> String {
    let trimmed = explicit_key.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    api_key_from_env().unwrap_or_default()
}

pub fn config_path() -> PathBuf {
    env_value(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Reads settings from `path`, falling back to defaults when the file is absent.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        serde_json::from_str::<Settings>(&content)
            .with_context(|| format!("invalid settings file {}", path.display()))?
    } else {
        log::info!("No settings file at {}, using defaults", path.display());
        Settings::default()
    };
    apply_env_defaults(&mut settings);
    Ok(settings)
}

pub fn apply_env_defaults(settings: &mut Settings) {
    settings.upstream.api_key = resolve_api_key(&settings.upstream.api_key);
    if let Some(url) = env_value(ENV_BASE_URL) {
        settings.upstream.base_url = url;
    }
    if let Some(mode) = env_value(ENV_MODE) {
        match DataMode::parse(&mode) {
            Some(parsed) => settings.mode = parsed,
            None => log::warn!("Ignoring unknown {}={}", ENV_MODE, mode),
        }
    }
    if let Some(addr) = env_value(ENV_BIND_ADDR) {
        settings.server.bind_addr = addr;
    }
    if let Some(path) = env_value(ENV_DB_PATH) {
        settings.storage.db_path = path;
    }
}
