use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::source_cache::SourceCache;
use super::upstream::{is_server_error, UpstreamClient, UpstreamError};
use crate::models::{
    ActivityItem, EnrollmentRecord, Fallback, Learner, Product, SourceDegradation, SourceKind,
    Transaction, UpstreamSettings,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },
    #[error("not found upstream")]
    NotFound,
    #[error("session rejected by upstream")]
    Unauthorized,
    #[error("malformed upstream payload: {0}")]
    Validation(String),
}

impl FetchError {
    pub fn class(&self) -> &'static str {
        match self {
            FetchError::Unavailable(_) => "unavailable",
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::NotFound => "not_found",
            FetchError::Unauthorized => "unauthorized",
            FetchError::Validation(_) => "validation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Bound on a single attempt.
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Delay before the single 429 retry when no `Retry-After` is given.
    pub rate_limit_backoff: Duration,
    pub max_retry_after: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from_settings(&UpstreamSettings::default())
    }
}

impl FetchPolicy {
    pub fn from_settings(settings: &UpstreamSettings) -> Self {
        Self {
            timeout: Duration::from_millis(settings.timeout_ms.max(1)),
            max_retries: settings.max_retries,
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            backoff_cap: Duration::from_millis(settings.backoff_cap_ms),
            rate_limit_backoff: Duration::from_millis(settings.rate_limit_backoff_ms),
            max_retry_after: Duration::from_millis(settings.max_retry_after_ms),
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

enum Disposition {
    Final(FetchError),
    Transient(String),
    RateLimited(Option<Duration>),
}

fn classify(error: &UpstreamError) -> Disposition {
    match error {
        UpstreamError::Status { status: 401 | 403, .. } => Disposition::Final(FetchError::Unauthorized),
        UpstreamError::Status { status: 404, .. } => Disposition::Final(FetchError::NotFound),
        UpstreamError::Status { status: 429, retry_after, .. } => Disposition::RateLimited(*retry_after),
        UpstreamError::Status { status, .. } if is_server_error(*status) => {
            Disposition::Transient(error.to_string())
        }
        UpstreamError::Status { .. } => Disposition::Final(FetchError::Unavailable(error.to_string())),
        UpstreamError::Network(_) | UpstreamError::Timeout => Disposition::Transient(error.to_string()),
        UpstreamError::Decode(reason) => Disposition::Final(FetchError::Validation(reason.clone())),
    }
}

/// Runs `op` under the timeout/retry policy and maps the outcome onto the fetch taxonomy.
pub async fn fetch_with_policy<T, F, Fut>(
    policy: &FetchPolicy,
    source: SourceKind,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut retries = 0u32;
    let mut rate_limit_retried = false;

    loop {
        let outcome = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(UpstreamError::Timeout),
        };
        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match classify(&error) {
            Disposition::Final(fetch_error) => return Err(fetch_error),
            Disposition::RateLimited(retry_after) => {
                if rate_limit_retried {
                    return Err(FetchError::RateLimited { retry_after });
                }
                rate_limit_retried = true;
                let delay = retry_after
                    .map(|d| d.min(policy.max_retry_after))
                    .unwrap_or(policy.rate_limit_backoff);
                log::debug!("{} rate limited, retrying once in {:?}", source, delay);
                tokio::time::sleep(delay).await;
            }
            Disposition::Transient(reason) => {
                if retries >= policy.max_retries {
                    return Err(FetchError::Unavailable(reason));
                }
                let delay = policy.backoff(retries);
                retries += 1;
                log::debug!(
                    "{} fetch failed ({}), retry {}/{} in {:?}",
                    source,
                    reason,
                    retries,
                    policy.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Data for one source plus, when it did not come from a live call, why.
#[derive(Debug, Clone)]
pub struct SourceOutcome<T> {
    pub data: T,
    pub degradation: Option<SourceDegradation>,
}

impl<T> SourceOutcome<T> {
    fn live(data: T) -> Self {
        Self {
            data,
            degradation: None,
        }
    }
}

pub struct SourceFetchers {
    client: Arc<dyn UpstreamClient>,
    policy: FetchPolicy,
    cache: Option<SourceCache>,
}

impl SourceFetchers {
    pub fn new(client: Arc<dyn UpstreamClient>, policy: FetchPolicy, cache: Option<SourceCache>) -> Self {
        Self { client, policy, cache }
    }

    /// `NotFound` and `Unauthorized` are returned as errors; anything else degrades.
    pub async fn fetch_profile(&self, email: &str) -> Result<SourceOutcome<Learner>, FetchError> {
        let result = self
            .fetch_live(
                SourceKind::Profile,
                email,
                || self.client.fetch_profile(email),
                |learner: &Learner| {
                    if learner.matches_email(email) {
                        Ok(())
                    } else {
                        Err(format!("profile returned for {}", learner.email))
                    }
                },
            )
            .await;
        match result {
            Err(FetchError::NotFound) => Err(FetchError::NotFound),
            other => self.settle(SourceKind::Profile, email, other, || {
                Learner::placeholder(email, Utc::now())
            }),
        }
    }

    pub async fn fetch_enrollments(
        &self,
        email: &str,
    ) -> Result<SourceOutcome<Vec<EnrollmentRecord>>, FetchError> {
        let result = self
            .fetch_live(
                SourceKind::Enrollments,
                email,
                || self.client.fetch_enrollments(email),
                |data: &Vec<EnrollmentRecord>| validate_enrollments(data),
            )
            .await;
        self.settle(SourceKind::Enrollments, email, result, Vec::new)
    }

    pub async fn fetch_transactions(
        &self,
        email: &str,
    ) -> Result<SourceOutcome<Vec<Transaction>>, FetchError> {
        let result = self
            .fetch_live(
                SourceKind::Transactions,
                email,
                || self.client.fetch_transactions(email),
                |data: &Vec<Transaction>| validate_transactions(data),
            )
            .await;
        self.settle(SourceKind::Transactions, email, result, Vec::new)
    }

    pub async fn fetch_activity(&self, email: &str) -> Result<SourceOutcome<Vec<ActivityItem>>, FetchError> {
        let result = self
            .fetch_live(
                SourceKind::Activity,
                email,
                || self.client.fetch_activity(email),
                |data: &Vec<ActivityItem>| validate_activity(data),
            )
            .await;
        self.settle(SourceKind::Activity, email, result, Vec::new)
    }

    pub async fn fetch_catalog(&self, email: &str) -> Result<SourceOutcome<Vec<Product>>, FetchError> {
        let result = self
            .fetch_live(
                SourceKind::Catalog,
                email,
                || self.client.fetch_catalog(email),
                |data: &Vec<Product>| validate_catalog(data),
            )
            .await;
        self.settle(SourceKind::Catalog, email, result, Vec::new)
    }

    async fn fetch_live<T, F, Fut, V>(
        &self,
        kind: SourceKind,
        email: &str,
        op: F,
        validate: V,
    ) -> Result<T, FetchError>
    where
        T: Serialize,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
        V: Fn(&T) -> Result<(), String>,
    {
        let data = fetch_with_policy(&self.policy, kind, op).await?;
        validate(&data).map_err(FetchError::Validation)?;
        if let Some(cache) = &self.cache {
            cache.store(email, kind, &data, Utc::now());
        }
        Ok(data)
    }

    fn settle<T: DeserializeOwned>(
        &self,
        kind: SourceKind,
        email: &str,
        result: Result<T, FetchError>,
        empty: impl FnOnce() -> T,
    ) -> Result<SourceOutcome<T>, FetchError> {
        let error = match result {
            Ok(data) => return Ok(SourceOutcome::live(data)),
            Err(FetchError::Unauthorized) => return Err(FetchError::Unauthorized),
            Err(error) => error,
        };

        let cached = self.cache.as_ref().and_then(|cache| cache.load::<T>(email, kind));
        let (data, fallback) = match cached {
            Some((data, cached_at)) => (data, Fallback::Cached { cached_at }),
            None => (empty(), Fallback::Empty),
        };
        log::warn!("{} source degraded ({}), serving {:?}", kind, error, fallback);

        Ok(SourceOutcome {
            data,
            degradation: Some(SourceDegradation {
                source: kind,
                error: error.class().to_string(),
                reason: error.to_string(),
                fallback,
            }),
        })
    }
}

fn validate_enrollments(records: &[EnrollmentRecord]) -> Result<(), String> {
    for record in records {
        if record.total_lessons == 0 {
            return Err(format!("enrollment {} has no lessons", record.enrollment.id));
        }
        if record.completed_lessons > record.total_lessons {
            return Err(format!(
                "enrollment {} reports {} of {} lessons completed",
                record.enrollment.id, record.completed_lessons, record.total_lessons
            ));
        }
        if record.enrollment.product_id != record.product.id {
            return Err(format!(
                "enrollment {} references {} but carries {}",
                record.enrollment.id, record.enrollment.product_id, record.product.id
            ));
        }
    }
    Ok(())
}

fn validate_transactions(transactions: &[Transaction]) -> Result<(), String> {
    match transactions.iter().find(|t| !t.is_consistent()) {
        Some(t) => Err(format!("transaction {} carries a refund but is {:?}", t.id, t.status)),
        None => Ok(()),
    }
}

fn validate_activity(items: &[ActivityItem]) -> Result<(), String> {
    if items.iter().any(|item| item.id.trim().is_empty()) {
        return Err("activity item without id".to_string());
    }
    Ok(())
}

fn validate_catalog(products: &[Product]) -> Result<(), String> {
    if products.iter().any(|p| p.id.trim().is_empty()) {
        return Err("catalog product without id".to_string());
    }
    Ok(())
}
