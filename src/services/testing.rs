//! Scripted upstream and fixtures shared by the service tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use super::upstream::{UpstreamClient, UpstreamError};
use crate::models::{
    ActivityItem, ActivityType, Enrollment, EnrollmentRecord, Learner, Lesson, Product, Refund,
    SourceKind, Transaction, TransactionStatus,
};

pub const EMAIL: &str = "asha@example.com";
pub const LEARNER_ID: &str = "learner-1";

#[derive(Debug, Clone)]
pub struct Fixture {
    pub learner: Learner,
    pub enrollments: Vec<EnrollmentRecord>,
    pub transactions: Vec<Transaction>,
    pub activity: Vec<ActivityItem>,
    pub catalog: Vec<Product>,
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

pub fn product(id: &str, category: &str, tags: &[&str], lessons: usize, learner_count: u64) -> Product {
    Product {
        id: id.to_string(),
        title: format!("Course {}", id),
        description: String::new(),
        category: category.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        price: 49.0,
        currency: "USD".to_string(),
        duration_minutes: 60 * lessons as u32,
        instructor: "Guru".to_string(),
        syllabus: (1..=lessons)
            .map(|i| Lesson {
                id: format!("{}-l{}", id, i),
                title: format!("Lesson {}", i),
            })
            .collect(),
        thumbnail: None,
        learner_count,
    }
}

pub fn enrollment(product: &Product, completed: u32, enrolled_day: u32) -> EnrollmentRecord {
    EnrollmentRecord {
        enrollment: Enrollment {
            id: format!("enr-{}", product.id),
            learner_id: LEARNER_ID.to_string(),
            product_id: product.id.clone(),
            created_at: at(enrolled_day, 8),
        },
        product: product.clone(),
        completed_lessons: completed,
        total_lessons: product.syllabus.len() as u32,
    }
}

pub fn activity(id: &str, activity_type: ActivityType, ts: DateTime<Utc>, product_id: Option<&str>) -> ActivityItem {
    ActivityItem {
        id: id.to_string(),
        learner_id: LEARNER_ID.to_string(),
        activity_type,
        title: format!("Activity {}", id),
        description: String::new(),
        timestamp: ts,
        metadata: None,
        product_id: product_id.map(str::to_string),
    }
}

pub fn transaction(id: &str, product_id: &str, status: TransactionStatus) -> Transaction {
    Transaction {
        id: id.to_string(),
        learner_id: LEARNER_ID.to_string(),
        product_id: product_id.to_string(),
        amount: 49.0,
        currency: "USD".to_string(),
        status,
        created_at: at(1, 9),
        updated_at: at(1, 9),
        refund: if status == TransactionStatus::Refunded {
            Some(Refund {
                amount: 49.0,
                refunded_at: at(2, 9),
            })
        } else {
            None
        },
    }
}

pub fn learner() -> Learner {
    Learner {
        id: LEARNER_ID.to_string(),
        email: EMAIL.to_string(),
        name: "Asha".to_string(),
        created_at: at(1, 0),
        last_active_at: Some(at(9, 7)),
        timezone: Some("UTC".to_string()),
    }
}

pub fn catalog() -> Vec<Product> {
    vec![
        product("yoga-101", "yoga", &["breath", "posture", "beginner"], 6, 500),
        product("yoga-201", "yoga", &["breath", "focus", "meditation"], 8, 120),
        product("med-101", "meditation", &["breath", "meditation", "beginner"], 6, 900),
        product("med-201", "meditation", &["meditation", "silence"], 4, 40),
        product("ayur-101", "ayurveda", &["diet", "wellness"], 12, 300),
        product("chant-101", "chanting", &["mantra", "sound"], 5, 50),
    ]
}

/// Yoga course half done, meditation course finished, three-day activity streak ending 10 March.
pub fn fixture() -> Fixture {
    let catalog = catalog();
    let yoga = catalog[0].clone();
    let meditation = catalog[2].clone();
    Fixture {
        learner: learner(),
        enrollments: vec![enrollment(&yoga, 3, 2), enrollment(&meditation, 6, 1)],
        transactions: vec![
            transaction("t1", "yoga-101", TransactionStatus::Completed),
            transaction("t2", "med-101", TransactionStatus::Completed),
            transaction("t3", "ayur-101", TransactionStatus::Refunded),
        ],
        activity: vec![
            activity("a1", ActivityType::LessonCompletion, at(5, 7), Some("yoga-101")),
            activity("a2", ActivityType::CertificateEarned, at(6, 18), Some("med-101")),
            activity("a3", ActivityType::LessonCompletion, at(8, 7), Some("yoga-101")),
            activity("a4", ActivityType::Discussion, at(9, 8), None),
            activity("a5", ActivityType::QuizCompletion, at(10, 7), Some("yoga-101")),
        ],
        catalog,
    }
}

#[derive(Default)]
struct Script {
    queue: VecDeque<UpstreamError>,
    always: Option<UpstreamError>,
}

/// Serves a fixture, with per-source injected failures, delays and call counters.
pub struct FakeUpstream {
    fixture: Mutex<Fixture>,
    scripts: Mutex<HashMap<SourceKind, Script>>,
    delays: Mutex<HashMap<SourceKind, Duration>>,
    calls: Mutex<HashMap<SourceKind, usize>>,
}

impl FakeUpstream {
    pub fn healthy(fixture: Fixture) -> Self {
        Self {
            fixture: Mutex::new(fixture),
            scripts: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Changes what the upstream serves from now on.
    pub fn update(&self, change: impl FnOnce(&mut Fixture)) {
        change(&mut self.fixture.lock().unwrap());
    }

    pub fn fail_once(&self, kind: SourceKind, error: UpstreamError) {
        self.scripts.lock().unwrap().entry(kind).or_default().queue.push_back(error);
    }

    pub fn fail_always(&self, kind: SourceKind, error: UpstreamError) {
        self.scripts.lock().unwrap().entry(kind).or_default().always = Some(error);
    }

    pub fn recover(&self, kind: SourceKind) {
        self.scripts.lock().unwrap().remove(&kind);
    }

    pub fn set_delay(&self, kind: SourceKind, delay: Duration) {
        self.delays.lock().unwrap().insert(kind, delay);
    }

    pub fn calls(&self, kind: SourceKind) -> usize {
        self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }

    async fn respond<T>(&self, kind: SourceKind, pick: impl FnOnce(&Fixture) -> T) -> Result<T, UpstreamError> {
        *self.calls.lock().unwrap().entry(kind).or_insert(0) += 1;
        let delay = self.delays.lock().unwrap().get(&kind).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts
                .get_mut(&kind)
                .and_then(|s| s.queue.pop_front().or_else(|| s.always.clone()))
        };
        match scripted {
            Some(error) => Err(error),
            None => Ok(pick(&self.fixture.lock().unwrap())),
        }
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn fetch_profile(&self, _email: &str) -> Result<Learner, UpstreamError> {
        self.respond(SourceKind::Profile, |f| f.learner.clone()).await
    }

    async fn fetch_enrollments(&self, _email: &str) -> Result<Vec<EnrollmentRecord>, UpstreamError> {
        self.respond(SourceKind::Enrollments, |f| f.enrollments.clone()).await
    }

    async fn fetch_transactions(&self, _email: &str) -> Result<Vec<Transaction>, UpstreamError> {
        self.respond(SourceKind::Transactions, |f| f.transactions.clone()).await
    }

    async fn fetch_activity(&self, _email: &str) -> Result<Vec<ActivityItem>, UpstreamError> {
        self.respond(SourceKind::Activity, |f| f.activity.clone()).await
    }

    async fn fetch_catalog(&self, _email: &str) -> Result<Vec<Product>, UpstreamError> {
        self.respond(SourceKind::Catalog, |f| f.catalog.clone()).await
    }
}
