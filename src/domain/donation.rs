use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::domain::{DonorContact, PostalAddress};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
    Disputed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Disputed => "disputed",
        }
    }

    /// Allowed lifecycle moves. Everything else is an anomaly.
    pub fn can_transition_to(&self, next: &TransactionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Succeeded)
                | (Self::Pending, Self::Failed)
                | (Self::Succeeded, Self::Refunded)
                | (Self::Succeeded, Self::Disputed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TransactionStatus {
    type Error = AppError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "disputed" => Ok(Self::Disputed),
            other => Err(AppError::Database(format!(
                "Invalid transaction status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Usd,
    Cad,
    Eur,
    Gbp,
    Aud,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usd => "usd",
            Self::Cad => "cad",
            Self::Eur => "eur",
            Self::Gbp => "gbp",
            Self::Aud => "aud",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "usd" => Some(Self::Usd),
            "cad" => Some(Self::Cad),
            "eur" => Some(Self::Eur),
            "gbp" => Some(Self::Gbp),
            "aud" => Some(Self::Aud),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the donor actually paid, as classified after settlement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    #[default]
    Card,
    UsBankAccount,
    Link,
    Other,
}

impl PaymentMethodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::UsBankAccount => "us_bank_account",
            Self::Link => "link",
            Self::Other => "other",
        }
    }

    /// Classify a Stripe payment method `type` string.
    pub fn from_stripe(kind: &str) -> Self {
        match kind {
            "card" => Self::Card,
            "us_bank_account" => Self::UsBankAccount,
            "link" => Self::Link,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DonationTransaction {
    pub id: Uuid,
    pub church_id: Uuid,
    pub donor_id: Option<Uuid>,
    pub donation_type_id: Uuid,
    /// What the donor was charged, fees included when covered.
    pub amount_cents: i64,
    /// What the donor intended to give.
    pub base_amount_cents: i64,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub stripe_payment_intent_id: String,
    pub stripe_customer_id: Option<String>,
    pub idempotency_key: String,
    pub covered_fee_cents: i64,
    pub platform_fee_cents: i64,
    pub is_anonymous: bool,
    pub is_international: bool,
    pub donor_language: String,
    pub payment_method_type: Option<PaymentMethodType>,
    pub failure_message: Option<String>,
    pub refunded_amount_cents: i64,
    pub refunded_at: Option<DateTime<Utc>>,
    pub dispute_id: Option<String>,
    pub dispute_status: Option<String>,
    pub dispute_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DonationTransaction {
    /// Share of the intended gift given back once `refunded_cents` of the
    /// charge is refunded. A covered fee is the last money refunded.
    pub fn refunded_gift_cents(&self, refunded_cents: i64) -> i64 {
        refunded_cents.clamp(0, self.base_amount_cents)
    }
}

/// Insert payload for a freshly initiated, still pending donation.
#[derive(Debug, Clone)]
pub struct NewDonationTransaction {
    pub id: Uuid,
    pub church_id: Uuid,
    pub donor_id: Option<Uuid>,
    pub donation_type_id: Uuid,
    pub amount_cents: i64,
    pub base_amount_cents: i64,
    pub currency: Currency,
    pub stripe_payment_intent_id: String,
    pub stripe_customer_id: Option<String>,
    pub idempotency_key: String,
    pub covered_fee_cents: i64,
    pub platform_fee_cents: i64,
    pub is_anonymous: bool,
    pub is_international: bool,
    pub donor_language: String,
}

/// Donor-facing initiation payload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiateDonationRequest {
    #[validate(length(min = 8, max = 255))]
    pub idempotency_key: String,
    pub church_id: Uuid,
    pub donation_type_id: Uuid,
    /// Intended gift in minor units, before any covered fees.
    #[validate(range(min = 1, max = 99_999_999))]
    pub base_amount: i64,
    #[validate(custom(function = "validate_currency"))]
    pub currency: String,
    #[validate(email, length(max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 120))]
    pub first_name: String,
    #[validate(length(min = 1, max = 120))]
    pub last_name: String,
    #[validate(length(max = 40))]
    pub phone: Option<String>,
    #[validate(length(max = 200))]
    pub address_line1: Option<String>,
    #[validate(length(max = 200))]
    pub address_line2: Option<String>,
    #[validate(length(max = 120))]
    pub city: Option<String>,
    #[validate(length(max = 120))]
    pub state: Option<String>,
    #[validate(length(max = 20))]
    pub postal_code: Option<String>,
    #[validate(length(equal = 2))]
    pub country: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub cover_fees: bool,
    #[serde(default = "default_language")]
    #[validate(length(min = 2, max = 10))]
    pub donor_language: String,
}

impl InitiateDonationRequest {
    pub fn contact(&self) -> DonorContact {
        DonorContact {
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            address: PostalAddress {
                line1: self.address_line1.clone(),
                line2: self.address_line2.clone(),
                city: self.city.clone(),
                state: self.state.clone(),
                postal_code: self.postal_code.clone(),
                country: self.country.clone(),
            },
        }
        .normalized()
    }
}

fn default_language() -> String {
    "en".to_string()
}

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    match Currency::parse(currency) {
        Some(_) => Ok(()),
        None => Err(ValidationError::new("unsupported_currency")),
    }
}

/// What the donor's browser needs to confirm the payment.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DonationReceipt {
    pub client_secret: String,
    pub transaction_id: Uuid,
    pub stripe_account: String,
    /// Charged amount, covered fees included.
    pub amount: i64,
}
