use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActivityItem, CourseProgress, Learner, Product, Transaction};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_courses: u32,
    pub completed_courses: u32,
    pub in_progress_courses: u32,
    /// Minutes.
    pub total_learning_time: u32,
    pub average_completion_rate: f64,
    pub streak_days: u32,
    pub total_certificates: u32,
    pub last_active_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Profile,
    Enrollments,
    Transactions,
    Activity,
    Catalog,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Profile => "profile",
            SourceKind::Enrollments => "enrollments",
            SourceKind::Transactions => "transactions",
            SourceKind::Activity => "activity",
            SourceKind::Catalog => "catalog",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Live,
    Fallback,
    Mock,
}

impl DataSource {
    /// Value of the `cacheStatus` field in the dashboard response metadata.
    pub fn cache_status(&self) -> &'static str {
        match self {
            DataSource::Live => "real-data-from-graphy",
            DataSource::Fallback => "fallback",
            DataSource::Mock => "mock",
        }
    }
}

/// What a degraded source served instead of live data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Fallback {
    Cached {
        #[serde(rename = "cachedAt")]
        cached_at: DateTime<Utc>,
    },
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceDegradation {
    pub source: SourceKind,
    /// Short error class: unavailable, rate_limited, not_found, validation.
    pub error: String,
    pub reason: String,
    pub fallback: Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub data_source: DataSource,
    pub degraded_sources: Vec<SourceDegradation>,
}

impl Provenance {
    pub fn is_fallback(&self) -> bool {
        !self.degraded_sources.is_empty() || self.data_source == DataSource::Fallback
    }

    pub fn is_degraded(&self, source: SourceKind) -> bool {
        self.degraded_sources.iter().any(|d| d.source == source)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub learner: Learner,
    pub summary: DashboardSummary,
    pub courses: Vec<CourseProgress>,
    pub activity: Vec<ActivityItem>,
    pub transactions: Vec<Transaction>,
    /// Catalog as fetched for this run; consumed by recommendation ranking.
    pub catalog: Vec<Product>,
    pub provenance: Provenance,
    pub generated_at: DateTime<Utc>,
}

impl DashboardSnapshot {
    pub fn is_enrolled(&self, product_id: &str) -> bool {
        self.courses.iter().any(|c| c.product.id == product_id)
    }
}
