use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Learner {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
    /// IANA zone name, e.g. "Asia/Kolkata". Falls back to the configured default.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl Learner {
    /// Minimal learner used when the profile source is degraded and nothing is cached.
    pub fn placeholder(email: &str, now: DateTime<Utc>) -> Self {
        let name = email
            .split('@')
            .next()
            .filter(|local| !local.is_empty())
            .unwrap_or("Learner")
            .to_string();
        Self {
            id: format!("email:{}", email.to_lowercase()),
            email: email.to_string(),
            name,
            created_at: now,
            last_active_at: None,
            timezone: None,
        }
    }

    pub fn matches_email(&self, email: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(email.trim())
    }
}
