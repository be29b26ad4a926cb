use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub version: String,
    #[serde(default)]
    pub mode: DataMode,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub recommendations: RecommendationSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            mode: DataMode::default(),
            upstream: UpstreamSettings::default(),
            refresh: RefreshSettings::default(),
            recommendations: RecommendationSettings::default(),
            server: ServerSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    #[default]
    Live,
    /// Serves the built-in demo dataset and tags every snapshot as mock.
    Demo,
}

impl DataMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "live" | "production" => Some(DataMode::Live),
            "demo" | "mock" => Some(DataMode::Demo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub rate_limit_backoff_ms: u64,
    #[serde(default = "default_max_retry_after_ms")]
    pub max_retry_after_ms: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.graphy.com/v1".to_string(),
            api_key: String::new(),
            timeout_ms: 8_000,
            max_retries: 2,
            backoff_base_ms: 250,
            backoff_cap_ms: 2_000,
            rate_limit_backoff_ms: 1_000,
            max_retry_after_ms: default_max_retry_after_ms(),
        }
    }
}

fn default_max_retry_after_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSettings {
    pub snapshot_interval_secs: u64,
    pub recommendations_interval_secs: u64,
    /// Floor for any timer cadence, including client-requested ones.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
}

fn default_min_interval_secs() -> u64 {
    30
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 10 * 60,
            recommendations_interval_secs: 5 * 60,
            min_interval_secs: default_min_interval_secs(),
        }
    }
}

impl RefreshSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs.max(1))
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs).max(self.min_interval())
    }

    pub fn recommendations_interval(&self) -> Duration {
        Duration::from_secs(self.recommendations_interval_secs).max(self.min_interval())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationSettings {
    pub max_results: usize,
    pub time_of_day_bonus: f64,
    pub streak_bonus: f64,
    pub recent_activity_bonus: f64,
    pub streak_threshold_days: u32,
    pub default_timezone: String,
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            max_results: 10,
            time_of_day_bonus: 0.03,
            streak_bonus: 0.05,
            recent_activity_bonus: 0.05,
            streak_threshold_days: 3,
            default_timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub db_path: String,
    pub cache_enabled: bool,
    #[serde(default = "default_cache_retention_days")]
    pub cache_retention_days: i64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "data/learner-dashboard.db".to_string(),
            cache_enabled: true,
            cache_retention_days: default_cache_retention_days(),
        }
    }
}

fn default_cache_retention_days() -> i64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"version":"1.0.0","mode":"demo"}"#).expect("parse settings");
        assert_eq!(settings.mode, DataMode::Demo);
        assert_eq!(settings.upstream.max_retries, 2);
        assert_eq!(settings.refresh.snapshot_interval(), Duration::from_secs(600));
        assert_eq!(settings.refresh.recommendations_interval(), Duration::from_secs(300));
        assert_eq!(settings.recommendations.max_results, 10);
    }

    #[test]
    fn mode_parsing_accepts_aliases() {
        assert_eq!(DataMode::parse("MOCK"), Some(DataMode::Demo));
        assert_eq!(DataMode::parse(" live "), Some(DataMode::Live));
        assert_eq!(DataMode::parse("staging"), None);
    }
}
