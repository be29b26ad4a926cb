use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Discussion,
    QuizCompletion,
    LessonCompletion,
    LiveclassAttendance,
    Enrollment,
    CertificateEarned,
}

impl ActivityType {
    pub fn label(&self) -> &'static str {
        match self {
            ActivityType::Discussion => "Discussion",
            ActivityType::QuizCompletion => "Quiz completed",
            ActivityType::LessonCompletion => "Lesson completed",
            ActivityType::LiveclassAttendance => "Live class attended",
            ActivityType::Enrollment => "Enrolled",
            ActivityType::CertificateEarned => "Certificate earned",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMetadata {
    pub score: Option<f64>,
    pub progress_percentage: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub id: String,
    pub learner_id: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<ActivityMetadata>,
    #[serde(default)]
    pub product_id: Option<String>,
}
