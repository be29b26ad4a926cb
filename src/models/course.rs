use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub title: String,
}

/// A course as listed in the platform catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub price: f64,
    pub currency: String,
    /// Total running time in minutes.
    pub duration_minutes: u32,
    #[serde(default)]
    pub instructor: String,
    #[serde(default)]
    pub syllabus: Vec<Lesson>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Platform-wide enrollment count, used as the default popularity signal.
    #[serde(default)]
    pub learner_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub learner_id: String,
    pub product_id: String,
    pub created_at: DateTime<Utc>,
}

/// Raw enrollment row as returned upstream: the enrolled product and lesson counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    pub enrollment: Enrollment,
    pub product: Product,
    pub completed_lessons: u32,
    pub total_lessons: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub enrollment_id: String,
    pub completed_lessons: u32,
    pub total_lessons: u32,
    pub progress_percentage: u8,
    pub next_lesson: Option<Lesson>,
}

impl ProgressReport {
    /// Builds a report from raw counts. Returns `None` when the counts are inconsistent.
    pub fn from_counts(
        enrollment_id: &str,
        completed_lessons: u32,
        total_lessons: u32,
        syllabus: &[Lesson],
    ) -> Option<Self> {
        if total_lessons == 0 || completed_lessons > total_lessons {
            return None;
        }
        Some(Self {
            enrollment_id: enrollment_id.to_string(),
            completed_lessons,
            total_lessons,
            progress_percentage: progress_percentage(completed_lessons, total_lessons),
            next_lesson: if completed_lessons < total_lessons {
                syllabus.get(completed_lessons as usize).cloned()
            } else {
                None
            },
        })
    }

    pub fn is_completed(&self) -> bool {
        self.completed_lessons == self.total_lessons
    }

    pub fn is_in_progress(&self) -> bool {
        self.completed_lessons > 0 && self.completed_lessons < self.total_lessons
    }

    pub fn is_not_started(&self) -> bool {
        self.completed_lessons == 0 && self.total_lessons > 0
    }
}

/// Rounded percentage that only reaches 100 on full completion and never reads 0 once started.
pub fn progress_percentage(completed: u32, total: u32) -> u8 {
    if total == 0 || completed == 0 {
        return 0;
    }
    if completed >= total {
        return 100;
    }
    let raw = (completed as f64 / total as f64 * 100.0).round() as u8;
    raw.clamp(1, 99)
}

/// One row of the learner's course list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub product: Product,
    pub enrollment: Enrollment,
    pub progress: ProgressReport,
}
