use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub amount: f64,
    pub refunded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub learner_id: String,
    pub product_id: String,
    pub amount: f64,
    pub currency: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub refund: Option<Refund>,
}

impl Transaction {
    /// Refund details may only accompany a refunded transaction.
    pub fn is_consistent(&self) -> bool {
        self.refund.is_none() || self.status == TransactionStatus::Refunded
    }

    /// Whether this purchase gives the learner access to the product.
    pub fn grants_access(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Completed | TransactionStatus::Pending
        )
    }
}
