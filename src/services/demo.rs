use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use super::upstream::{UpstreamClient, UpstreamError};
use crate::models::{
    ActivityItem, ActivityMetadata, ActivityType, Enrollment, EnrollmentRecord, Learner, Lesson,
    Product, Transaction, TransactionStatus,
};

const DEMO_LEARNER_ID: &str = "demo-learner";

/// In-process upstream serving a fixed learner whose history ends yesterday.
pub struct DemoUpstream {
    anchor: Option<NaiveDate>,
}

impl DemoUpstream {
    /// Anchored to the current UTC date on every call.
    pub fn new() -> Self {
        Self { anchor: None }
    }

    pub fn anchored(date: NaiveDate) -> Self {
        Self { anchor: Some(date) }
    }

    fn today(&self) -> NaiveDate {
        self.anchor.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn at(&self, days_ago: i64, hour: u32, minute: u32) -> DateTime<Utc> {
        let date = self.today() - Duration::days(days_ago);
        let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
        Utc.from_utc_datetime(&date.and_time(time))
    }

    fn learner(&self, email: &str) -> Learner {
        Learner {
            id: DEMO_LEARNER_ID.to_string(),
            email: email.trim().to_string(),
            name: "Demo Learner".to_string(),
            created_at: self.at(60, 9, 0),
            last_active_at: Some(self.at(1, 7, 40)),
            timezone: Some("UTC".to_string()),
        }
    }

    fn enrollment(&self, product_id: &str, completed: u32, days_ago: i64) -> Option<EnrollmentRecord> {
        let product = demo_catalog().into_iter().find(|p| p.id == product_id)?;
        Some(EnrollmentRecord {
            enrollment: Enrollment {
                id: format!("demo-enr-{}", product.id),
                learner_id: DEMO_LEARNER_ID.to_string(),
                product_id: product.id.clone(),
                created_at: self.at(days_ago, 10, 0),
            },
            total_lessons: product.syllabus.len() as u32,
            completed_lessons: completed,
            product,
        })
    }

    fn activity(
        &self,
        id: &str,
        activity_type: ActivityType,
        title: &str,
        timestamp: DateTime<Utc>,
        product_id: Option<&str>,
        metadata: Option<ActivityMetadata>,
    ) -> ActivityItem {
        ActivityItem {
            id: id.to_string(),
            learner_id: DEMO_LEARNER_ID.to_string(),
            activity_type,
            title: title.to_string(),
            description: String::new(),
            timestamp,
            metadata,
            product_id: product_id.map(str::to_string),
        }
    }
}

impl Default for DemoUpstream {
    fn default() -> Self {
        Self::new()
    }
}

fn demo_product(
    id: &str,
    title: &str,
    category: &str,
    tags: &[&str],
    lessons: usize,
    price: f64,
    learner_count: u64,
) -> Product {
    Product {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("{} with guided practice", title),
        category: category.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        price,
        currency: "INR".to_string(),
        duration_minutes: 25 * lessons as u32,
        instructor: "Acharya Demo".to_string(),
        syllabus: (1..=lessons)
            .map(|n| Lesson {
                id: format!("{}-lesson-{}", id, n),
                title: format!("{}: Lesson {}", title, n),
            })
            .collect(),
        thumbnail: None,
        learner_count,
    }
}

fn demo_catalog() -> Vec<Product> {
    vec![
        demo_product("hatha-foundations", "Hatha Foundations", "yoga", &["breath", "posture", "beginner"], 8, 1499.0, 1800),
        demo_product("vinyasa-flow", "Vinyasa Flow", "yoga", &["flow", "strength", "posture"], 10, 1999.0, 950),
        demo_product("breath-mastery", "Breath Mastery", "pranayama", &["breath", "energy", "focus"], 6, 999.0, 1200),
        demo_product("mindful-mornings", "Mindful Mornings", "meditation", &["meditation", "focus", "routine"], 7, 0.0, 2100),
        demo_product("yoga-nidra", "Yoga Nidra", "meditation", &["sleep", "relaxation", "meditation"], 5, 799.0, 640),
        demo_product("ayurveda-basics", "Ayurveda Basics", "ayurveda", &["diet", "wellness", "dosha"], 12, 2499.0, 780),
        demo_product("sanskrit-chanting", "Sanskrit Chanting", "chanting", &["mantra", "sound", "sanskrit"], 9, 1299.0, 410),
        demo_product("gita-wisdom", "Wisdom of the Gita", "philosophy", &["gita", "dharma", "ethics"], 18, 2999.0, 1500),
    ]
}

#[async_trait]
impl UpstreamClient for DemoUpstream {
    async fn fetch_profile(&self, email: &str) -> Result<Learner, UpstreamError> {
        Ok(self.learner(email))
    }

    async fn fetch_enrollments(&self, _email: &str) -> Result<Vec<EnrollmentRecord>, UpstreamError> {
        Ok([
            self.enrollment("hatha-foundations", 5, 20),
            self.enrollment("mindful-mornings", 7, 40),
            self.enrollment("gita-wisdom", 0, 3),
        ]
        .into_iter()
        .flatten()
        .collect())
    }

    async fn fetch_transactions(&self, _email: &str) -> Result<Vec<Transaction>, UpstreamError> {
        let purchase = |id: &str, product_id: &str, amount: f64, days_ago: i64| Transaction {
            id: id.to_string(),
            learner_id: DEMO_LEARNER_ID.to_string(),
            product_id: product_id.to_string(),
            amount,
            currency: "INR".to_string(),
            status: TransactionStatus::Completed,
            created_at: self.at(days_ago, 9, 55),
            updated_at: self.at(days_ago, 9, 56),
            refund: None,
        };
        Ok(vec![
            purchase("demo-txn-1", "hatha-foundations", 1499.0, 20),
            purchase("demo-txn-2", "gita-wisdom", 2999.0, 3),
        ])
    }

    async fn fetch_activity(&self, _email: &str) -> Result<Vec<ActivityItem>, UpstreamError> {
        let progress = |pct: u8| {
            Some(ActivityMetadata {
                score: None,
                progress_percentage: Some(pct),
            })
        };
        Ok(vec![
            self.activity("demo-act-1", ActivityType::LessonCompletion, "Completed Hatha Foundations: Lesson 5", self.at(1, 7, 40), Some("hatha-foundations"), progress(63)),
            self.activity("demo-act-2", ActivityType::QuizCompletion, "Posture quiz", self.at(2, 7, 15), Some("hatha-foundations"), Some(ActivityMetadata { score: Some(86.0), progress_percentage: None })),
            self.activity("demo-act-3", ActivityType::Enrollment, "Enrolled in Wisdom of the Gita", self.at(3, 10, 0), Some("gita-wisdom"), None),
            self.activity("demo-act-4", ActivityType::LessonCompletion, "Completed Hatha Foundations: Lesson 4", self.at(3, 6, 50), Some("hatha-foundations"), progress(50)),
            self.activity("demo-act-5", ActivityType::LiveclassAttendance, "Sunday satsang", self.at(5, 18, 30), None, None),
            self.activity("demo-act-6", ActivityType::CertificateEarned, "Mindful Mornings certificate", self.at(9, 19, 5), Some("mindful-mornings"), None),
            self.activity("demo-act-7", ActivityType::Discussion, "", self.at(12, 20, 0), None, None),
        ])
    }

    async fn fetch_catalog(&self, _email: &str) -> Result<Vec<Product>, UpstreamError> {
        Ok(demo_catalog())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::models::{DataMode, DataSource, RecommendationSettings, RecommendationType};
    use crate::services::aggregator::Aggregator;
    use crate::services::recommendation_engine::RecommendationEngine;
    use crate::services::source_fetcher::{FetchPolicy, SourceFetchers};

    fn anchor() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 20).expect("date")
    }

    #[tokio::test]
    async fn demo_snapshot_is_tagged_mock() {
        let fetchers = SourceFetchers::new(Arc::new(DemoUpstream::anchored(anchor())), FetchPolicy::default(), None);
        let snapshot = Aggregator::new(fetchers, DataMode::Demo, "UTC")
            .build_snapshot("seeker@example.com")
            .await
            .expect("snapshot");

        assert_eq!(snapshot.provenance.data_source, DataSource::Mock);
        assert_eq!(snapshot.learner.email, "seeker@example.com");
        assert_eq!(snapshot.catalog.len(), 8);
        assert_eq!(snapshot.transactions.len(), 2);
        assert_eq!(snapshot.summary.total_courses, 3);
        assert_eq!(snapshot.summary.completed_courses, 1);
        assert_eq!(snapshot.summary.in_progress_courses, 1);
        // activity on the three days before the anchor
        assert_eq!(snapshot.summary.streak_days, 3);
        assert!(snapshot.activity.iter().all(|a| !a.title.is_empty()));
    }

    #[tokio::test]
    async fn demo_learner_gets_a_resume_first() {
        let fetchers = SourceFetchers::new(Arc::new(DemoUpstream::anchored(anchor())), FetchPolicy::default(), None);
        let snapshot = Aggregator::new(fetchers, DataMode::Demo, "UTC")
            .build_snapshot("seeker@example.com")
            .await
            .expect("snapshot");
        let engine = RecommendationEngine::new(RecommendationSettings::default());
        let profile = engine.build_profile(&snapshot);
        let now = Utc.from_utc_datetime(&anchor().and_hms_opt(8, 0, 0).expect("time"));
        let list = engine.rank(&snapshot, &profile, now);

        assert_eq!(list[0].recommendation_type, RecommendationType::Resume);
        assert_eq!(list[0].product.id, "hatha-foundations");
        assert!(list
            .iter()
            .any(|r| r.recommendation_type == RecommendationType::NextLesson && r.product.id == "gita-wisdom"));
        assert!(list.iter().all(|r| r.product.id != "mindful-mornings"));
    }
}
