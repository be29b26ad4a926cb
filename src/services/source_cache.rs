use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::database::{queries, Database};
use crate::models::SourceKind;
use crate::utils::hash_string;

const MAINTENANCE_INTERVAL_SECS: u64 = 6 * 60 * 60;

/// Last good payload per (learner, source), used as the degraded-source fallback.
#[derive(Clone)]
pub struct SourceCache {
    db: Database,
}

impl SourceCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn store<T: Serialize>(&self, email: &str, kind: SourceKind, value: &T, fetched_at: DateTime<Utc>) {
        let json = match serde_json::to_vec(value) {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to encode {} payload for cache: {}", kind, e);
                return;
            }
        };
        let key = hash_string(email);
        if let Err(e) = self.db.with_conn(|c| {
            queries::store_source_payload(c, key, kind.as_str(), &json, fetched_at.timestamp())
        }) {
            log::error!("Failed to cache {} payload: {}", kind, e);
        }
    }

    pub fn load<T: DeserializeOwned>(&self, email: &str, kind: SourceKind) -> Option<(T, DateTime<Utc>)> {
        let key = hash_string(email);
        let cached = match self.db.with_conn(|c| queries::load_source_payload(c, key, kind.as_str())) {
            Ok(cached) => cached?,
            Err(e) => {
                log::error!("Failed to read cached {} payload: {}", kind, e);
                return None;
            }
        };
        let value = match serde_json::from_slice::<T>(&cached.json) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Discarding unreadable cached {} payload: {}", kind, e);
                return None;
            }
        };
        let fetched_at = Utc.timestamp_opt(cached.fetched_at, 0).single()?;
        Some((value, fetched_at))
    }

    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        self.db
            .with_conn(|c| queries::prune_source_cache(c, cutoff.timestamp()))
    }
}

pub fn start_cache_maintenance(cache: SourceCache, retention_days: i64) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let cutoff = Utc::now() - chrono::Duration::days(retention_days.max(1));
            match cache.prune_older_than(cutoff) {
                Ok(0) => {}
                Ok(removed) => log::info!("Pruned {} stale cached source payloads", removed),
                Err(e) => log::error!("Source cache maintenance failed: {}", e),
            }
            tokio::time::sleep(Duration::from_secs(MAINTENANCE_INTERVAL_SECS)).await;
        }
    })
}
