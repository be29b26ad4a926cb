use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::models::{ActivityItem, EnrollmentRecord, Learner, Product, Transaction, UpstreamSettings};

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream returned HTTP {status}: {body}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },
    #[error("upstream request failed: {0}")]
    Network(String),
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream payload could not be decoded: {0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn status(status: u16) -> Self {
        UpstreamError::Status {
            status,
            retry_after: None,
            body: String::new(),
        }
    }
}

/// Per-kind fetches against the course platform, keyed by learner email.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch_profile(&self, email: &str) -> Result<Learner, UpstreamError>;
    async fn fetch_enrollments(&self, email: &str) -> Result<Vec<EnrollmentRecord>, UpstreamError>;
    async fn fetch_transactions(&self, email: &str) -> Result<Vec<Transaction>, UpstreamError>;
    async fn fetch_activity(&self, email: &str) -> Result<Vec<ActivityItem>, UpstreamError>;
    async fn fetch_catalog(&self, email: &str) -> Result<Vec<Product>, UpstreamError>;
}

pub struct HttpUpstreamClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpUpstreamClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, UpstreamError> {
        // Per-attempt timeouts are enforced by the fetch policy; this only guards connects.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.timeout_ms.max(1)))
            .build()
            .map_err(|e| UpstreamError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    fn learner_url(&self, email: &str, suffix: &str) -> String {
        let encoded = encode_path_segment(email.trim());
        if suffix.is_empty() {
            format!("{}/learners/{}", self.base_url, encoded)
        } else {
            format!("{}/learners/{}/{}", self.base_url, encoded, suffix)
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, UpstreamError> {
        let mut request = self.client.get(url).header("Accept", "application/json");
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                retry_after,
                body: body.chars().take(200).collect(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn fetch_profile(&self, email: &str) -> Result<Learner, UpstreamError> {
        self.get_json(&self.learner_url(email, "")).await
    }

    async fn fetch_enrollments(&self, email: &str) -> Result<Vec<EnrollmentRecord>, UpstreamError> {
        self.get_json(&self.learner_url(email, "enrollments")).await
    }

    async fn fetch_transactions(&self, email: &str) -> Result<Vec<Transaction>, UpstreamError> {
        self.get_json(&self.learner_url(email, "transactions")).await
    }

    async fn fetch_activity(&self, email: &str) -> Result<Vec<ActivityItem>, UpstreamError> {
        self.get_json(&self.learner_url(email, "activity")).await
    }

    async fn fetch_catalog(&self, _email: &str) -> Result<Vec<Product>, UpstreamError> {
        self.get_json(&format!("{}/catalog", self.base_url)).await
    }
}

/// Only the delta-seconds form of `Retry-After` is honoured.
fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'@' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

pub fn is_server_error(status: u16) -> bool {
    StatusCode::from_u16(status)
        .map(|s| s.is_server_error())
        .unwrap_or(false)
}
