use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::source_fetcher::{FetchError, SourceFetchers, SourceOutcome};
use super::summary::compute_summary;
use crate::models::{
    ActivityItem, CourseProgress, DashboardSnapshot, DataMode, DataSource, EnrollmentRecord,
    Learner, Product, ProgressReport, Provenance, SourceDegradation, Transaction,
};
use crate::utils::time::learner_timezone;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregateError {
    #[error("no learner registered for {email}")]
    LearnerNotFound { email: String },
    #[error("learner session is invalid or expired")]
    Unauthorized,
    #[error("refresh was cancelled before it completed")]
    Cancelled,
}

/// Builds one snapshot per call. Anything that owns a refresh cadence goes through this seam.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn build_snapshot(&self, email: &str) -> Result<DashboardSnapshot, AggregateError>;
}

pub struct Aggregator {
    fetchers: SourceFetchers,
    mode: DataMode,
    default_timezone: String,
}

/// Results of the secondary fetches, in the shape the merge step consumes.
pub struct SnapshotParts {
    pub learner: SourceOutcome<Learner>,
    pub enrollments: SourceOutcome<Vec<EnrollmentRecord>>,
    pub transactions: SourceOutcome<Vec<Transaction>>,
    pub activity: SourceOutcome<Vec<ActivityItem>>,
    pub catalog: SourceOutcome<Vec<Product>>,
}

impl Aggregator {
    pub fn new(fetchers: SourceFetchers, mode: DataMode, default_timezone: impl Into<String>) -> Self {
        Self {
            fetchers,
            mode,
            default_timezone: default_timezone.into(),
        }
    }

    pub async fn build_snapshot(&self, email: &str) -> Result<DashboardSnapshot, AggregateError> {
        let learner = match self.fetchers.fetch_profile(email).await {
            Ok(outcome) => outcome,
            Err(FetchError::NotFound) => {
                log::warn!("Learner {} not found upstream", email);
                return Err(AggregateError::LearnerNotFound {
                    email: email.to_string(),
                });
            }
            Err(_) => return Err(AggregateError::Unauthorized),
        };

        // Un-spawned futures: dropping this call drops every outstanding fetch.
        let (enrollments, transactions, activity, catalog) = tokio::join!(
            self.fetchers.fetch_enrollments(email),
            self.fetchers.fetch_transactions(email),
            self.fetchers.fetch_activity(email),
            self.fetchers.fetch_catalog(email),
        );

        let parts = SnapshotParts {
            learner,
            enrollments: enrollments.map_err(fatal)?,
            transactions: transactions.map_err(fatal)?,
            activity: activity.map_err(fatal)?,
            catalog: catalog.map_err(fatal)?,
        };

        let snapshot = merge_snapshot(parts, self.mode, &self.default_timezone, Utc::now());
        if !snapshot.provenance.degraded_sources.is_empty() {
            log::warn!(
                "Snapshot for {} built with {} degraded source(s)",
                email,
                snapshot.provenance.degraded_sources.len()
            );
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl SnapshotSource for Aggregator {
    async fn build_snapshot(&self, email: &str) -> Result<DashboardSnapshot, AggregateError> {
        Aggregator::build_snapshot(self, email).await
    }
}

/// Secondary fetchers only return an error when the session is rejected.
fn fatal(_: FetchError) -> AggregateError {
    AggregateError::Unauthorized
}

/// Single-threaded reduction over the fetched parts. Each part feeds a disjoint field.
pub fn merge_snapshot(
    parts: SnapshotParts,
    mode: DataMode,
    default_timezone: &str,
    now: DateTime<Utc>,
) -> DashboardSnapshot {
    let degraded_sources: Vec<SourceDegradation> = [
        parts.learner.degradation,
        parts.enrollments.degradation,
        parts.transactions.degradation,
        parts.activity.degradation,
        parts.catalog.degradation,
    ]
    .into_iter()
    .flatten()
    .collect();

    let learner = parts.learner.data;
    let tz = learner_timezone(&learner, default_timezone);
    let courses = merge_courses(parts.enrollments.data);
    let activity = order_activity(parts.activity.data);
    let transactions = order_transactions(parts.transactions.data);
    let catalog = dedupe_catalog(parts.catalog.data);
    let summary = compute_summary(&learner, &courses, &activity, tz);

    let data_source = match mode {
        DataMode::Demo => DataSource::Mock,
        DataMode::Live if degraded_sources.is_empty() => DataSource::Live,
        DataMode::Live => DataSource::Fallback,
    };

    DashboardSnapshot {
        learner,
        summary,
        courses,
        activity,
        transactions,
        catalog,
        provenance: Provenance {
            data_source,
            degraded_sources,
        },
        generated_at: now,
    }
}

fn merge_courses(records: Vec<EnrollmentRecord>) -> Vec<CourseProgress> {
    // At most one enrollment per product; the earliest one stands.
    let mut by_product: HashMap<String, EnrollmentRecord> = HashMap::new();
    for record in records {
        let key = record.enrollment.product_id.clone();
        let replace = match by_product.get(&key) {
            Some(existing) => {
                (record.enrollment.created_at, &record.enrollment.id)
                    < (existing.enrollment.created_at, &existing.enrollment.id)
            }
            None => true,
        };
        if replace {
            by_product.insert(key, record);
        }
    }

    let mut courses: Vec<CourseProgress> = by_product
        .into_values()
        .filter_map(|record| {
            let progress = ProgressReport::from_counts(
                &record.enrollment.id,
                record.completed_lessons,
                record.total_lessons,
                &record.product.syllabus,
            )?;
            Some(CourseProgress {
                product: record.product,
                enrollment: record.enrollment,
                progress,
            })
        })
        .collect();
    courses.sort_by(|a, b| {
        b.enrollment
            .created_at
            .cmp(&a.enrollment.created_at)
            .then_with(|| a.product.id.cmp(&b.product.id))
    });
    courses
}

fn order_activity(mut items: Vec<ActivityItem>) -> Vec<ActivityItem> {
    for item in items.iter_mut() {
        if item.title.trim().is_empty() {
            item.title = item.activity_type.label().to_string();
        }
    }
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
    items.dedup_by(|a, b| a.id == b.id);
    items
}

fn order_transactions(mut transactions: Vec<Transaction>) -> Vec<Transaction> {
    transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    transactions
}

fn dedupe_catalog(products: Vec<Product>) -> Vec<Product> {
    let mut seen = std::collections::HashSet::new();
    products
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::models::{ActivityType, Fallback, SourceKind};
    use crate::services::source_fetcher::FetchPolicy;
    use crate::services::testing::{self, FakeUpstream};
    use crate::services::upstream::UpstreamError;

    fn aggregator(upstream: &Arc<FakeUpstream>, mode: DataMode) -> Aggregator {
        Aggregator::new(
            SourceFetchers::new(upstream.clone(), FetchPolicy::default(), None),
            mode,
            "UTC",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_sources_produce_live_snapshot() {
        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        let snapshot = aggregator(&upstream, DataMode::Live)
            .build_snapshot(testing::EMAIL)
            .await
            .expect("snapshot");

        assert_eq!(snapshot.provenance.data_source, DataSource::Live);
        assert!(snapshot.provenance.degraded_sources.is_empty());
        assert_eq!(snapshot.summary.total_courses, 2);
        assert_eq!(snapshot.summary.completed_courses, 1);
        assert_eq!(snapshot.summary.in_progress_courses, 1);
        assert_eq!(snapshot.summary.streak_days, 3);
        assert_eq!(snapshot.summary.total_certificates, 1);
        // newest enrollment first
        assert_eq!(snapshot.courses[0].product.id, "yoga-101");
        assert_eq!(snapshot.activity[0].id, "a5");
        for course in &snapshot.courses {
            assert!(course.progress.completed_lessons <= course.progress.total_lessons);
            assert_eq!(
                course.progress.progress_percentage == 100,
                course.progress.completed_lessons == course.progress.total_lessons
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_transactions_degrade_only_their_field() {
        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        upstream.fail_always(SourceKind::Transactions, UpstreamError::status(503));

        let snapshot = aggregator(&upstream, DataMode::Live)
            .build_snapshot(testing::EMAIL)
            .await
            .expect("degraded snapshot");

        assert!(snapshot.transactions.is_empty());
        assert_eq!(snapshot.courses.len(), 2);
        assert_eq!(snapshot.summary.total_courses, 2);
        assert_eq!(snapshot.provenance.data_source, DataSource::Fallback);
        assert_eq!(snapshot.provenance.degraded_sources.len(), 1);
        let degradation = &snapshot.provenance.degraded_sources[0];
        assert_eq!(degradation.source, SourceKind::Transactions);
        assert_eq!(degradation.fallback, Fallback::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn profile_not_found_aborts_with_learner_not_found() {
        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        upstream.fail_always(SourceKind::Profile, UpstreamError::status(404));

        let result = aggregator(&upstream, DataMode::Live).build_snapshot(testing::EMAIL).await;
        assert_eq!(
            result.err(),
            Some(AggregateError::LearnerNotFound {
                email: testing::EMAIL.to_string()
            })
        );
        assert_eq!(upstream.calls(SourceKind::Catalog), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_anywhere_is_fatal() {
        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        upstream.fail_always(SourceKind::Profile, UpstreamError::status(401));
        let result = aggregator(&upstream, DataMode::Live).build_snapshot(testing::EMAIL).await;
        assert_eq!(result.err(), Some(AggregateError::Unauthorized));

        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        upstream.fail_always(SourceKind::Activity, UpstreamError::status(403));
        let result = aggregator(&upstream, DataMode::Live).build_snapshot(testing::EMAIL).await;
        assert_eq!(result.err(), Some(AggregateError::Unauthorized));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_does_not_block_the_others() {
        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        upstream.set_delay(SourceKind::Activity, Duration::from_secs(600));
        let fetchers = SourceFetchers::new(
            upstream.clone(),
            FetchPolicy {
                timeout: Duration::from_secs(2),
                max_retries: 1,
                ..FetchPolicy::default()
            },
            None,
        );

        let snapshot = Aggregator::new(fetchers, DataMode::Live, "UTC")
            .build_snapshot(testing::EMAIL)
            .await
            .expect("snapshot");
        assert!(snapshot.activity.is_empty());
        assert_eq!(snapshot.summary.streak_days, 0);
        assert!(snapshot.provenance.is_degraded(SourceKind::Activity));
        assert_eq!(snapshot.courses.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_builds_differ_only_in_generated_at() {
        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        let aggregator = aggregator(&upstream, DataMode::Live);
        let first = aggregator.build_snapshot(testing::EMAIL).await.expect("first");
        let mut second = aggregator.build_snapshot(testing::EMAIL).await.expect("second");
        second.generated_at = first.generated_at;
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn demo_mode_is_tagged_mock() {
        let upstream = Arc::new(FakeUpstream::healthy(testing::fixture()));
        let snapshot = aggregator(&upstream, DataMode::Demo)
            .build_snapshot(testing::EMAIL)
            .await
            .expect("snapshot");
        assert_eq!(snapshot.provenance.data_source, DataSource::Mock);
    }

    #[test]
    fn duplicate_enrollments_keep_the_earliest() {
        let product = testing::product("yoga-101", "yoga", &[], 6, 0);
        let mut late = testing::enrollment(&product, 4, 9);
        late.enrollment.id = "enr-late".to_string();
        let early = testing::enrollment(&product, 2, 3);
        let courses = merge_courses(vec![late, early]);
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].progress.completed_lessons, 2);
    }

    #[test]
    fn blank_activity_titles_get_a_label() {
        let mut item = testing::activity("x", ActivityType::CertificateEarned, testing::at(2, 2), None);
        item.title = String::new();
        let ordered = order_activity(vec![item]);
        assert_eq!(ordered[0].title, "Certificate earned");
    }
}
