use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Product;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    Resume,
    NextLesson,
    CategoryMatch,
    Similar,
    Popular,
}

impl RecommendationType {
    /// Tie-break rank; lower wins.
    pub fn priority(&self) -> u8 {
        match self {
            RecommendationType::Resume => 0,
            RecommendationType::NextLesson => 1,
            RecommendationType::CategoryMatch => 2,
            RecommendationType::Similar => 3,
            RecommendationType::Popular => 4,
        }
    }

    /// Continuation of work the learner already committed to.
    pub fn is_continuation(&self) -> bool {
        matches!(self, RecommendationType::Resume | RecommendationType::NextLesson)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            17..=21 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RealTimeFactors {
    pub time_of_day: TimeOfDay,
    pub time_of_day_match: bool,
    pub streak_bonus: bool,
    pub recent_activity_boost: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub product: Product,
    pub score: f64,
    pub reason: String,
    #[serde(rename = "type")]
    pub recommendation_type: RecommendationType,
    pub factors: RealTimeFactors,
}

/// What the learner already has or has been shown, plus the popularity signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationProfile {
    pub learner_id: String,
    pub owned_product_ids: BTreeSet<String>,
    #[serde(default)]
    pub seen_product_ids: BTreeSet<String>,
    #[serde(default, skip_serializing)]
    pub popularity: BTreeMap<String, f64>,
    pub preferred_category: Option<String>,
    pub streak_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationSet {
    pub recommendations: Vec<Recommendation>,
    pub learner_profile: RecommendationProfile,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
