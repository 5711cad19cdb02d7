use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A settlement batch Stripe reported for a church's connected account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutSummary {
    pub id: Uuid,
    pub church_id: Uuid,
    pub stripe_payout_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PayoutStatus,
    pub arrival_date: DateTime<Utc>,
    pub total_fees_cents: Option<i64>,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutSummary {
    pub fn is_reconciled(&self) -> bool {
        self.reconciled_at.is_some()
    }

    /// Actual fees once reconciled; the caller's estimate until then.
    pub fn effective_fees(&self, estimated_cents: i64) -> i64 {
        match (self.reconciled_at, self.total_fees_cents) {
            (Some(_), Some(actual)) => actual,
            _ => estimated_cents,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    InTransit,
    Paid,
    Failed,
    Canceled,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InTransit => "in_transit",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_transit" => Some(Self::InTransit),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

/// Payout fields as reported by a payout webhook.
#[derive(Debug, Clone)]
pub struct PayoutUpdate {
    pub church_id: Uuid,
    pub stripe_payout_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PayoutStatus,
    pub arrival_date: DateTime<Utc>,
}
