use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::{
    domain::{Currency, PaymentMethodType, PostalAddress},
    error::Result,
};

pub mod fees;
pub mod stripe_client;
pub mod webhook;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
#[cfg(any(test, feature = "test-utils"))]
pub mod fixtures;

pub use stripe_client::StripeGateway;
pub use webhook::{WebhookVerifier, SIGNATURE_HEADER};

/// Methods offered on donation intents. Stripe's default set would also
/// surface `customer_balance`, which donors find confusing.
const USD_METHOD_TYPES: &[&str] = &["card", "us_bank_account"];

/// ACH debits settle in USD only.
const CARD_ONLY: &[&str] = &["card"];

/// Payment method types Stripe accepts for an intent in `currency`.
pub fn payment_method_types(currency: Currency) -> &'static [&'static str] {
    match currency {
        Currency::Usd => USD_METHOD_TYPES,
        Currency::Cad | Currency::Eur | Currency::Gbp | Currency::Aud => CARD_ONLY,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerDetails {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub address: PostalAddress,
}

#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub amount_cents: i64,
    pub currency: Currency,
    pub customer_id: String,
    /// Platform fee routed to the platform account.
    pub application_fee_cents: i64,
    pub receipt_email: String,
    pub description: String,
    pub metadata: HashMap<String, String>,
    pub payment_method_types: &'static [&'static str],
    /// Forwarded to Stripe so racing retries converge on one intent.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIntent {
    pub id: String,
    pub client_secret: String,
}

/// Failure of a non-critical enrichment lookup.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("payment method lookup failed: {0}")]
    Provider(String),
    #[error("payment method not found: {0}")]
    NotFound(String),
}

pub trait LookupResultExt {
    /// Settle on the default classification when the lookup failed.
    fn or_default_method(self, payment_method_id: &str) -> PaymentMethodType;
}

impl LookupResultExt for std::result::Result<PaymentMethodType, LookupError> {
    fn or_default_method(self, payment_method_id: &str) -> PaymentMethodType {
        self.unwrap_or_else(|e| {
            tracing::warn!(
                payment_method = %payment_method_id,
                error = %e,
                "Falling back to default payment method type"
            );
            PaymentMethodType::default()
        })
    }
}

/// Everything this service asks of the payment provider. All calls except
/// `payment_method_type` with `None` are scoped to a connected account.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn find_customer_by_email(&self, account_id: &str, email: &str) -> Result<Option<String>>;
    async fn create_customer(&self, account_id: &str, details: &CustomerDetails) -> Result<String>;
    async fn update_customer(
        &self,
        account_id: &str,
        customer_id: &str,
        details: &CustomerDetails,
    ) -> Result<()>;
    async fn create_payment_intent(
        &self,
        account_id: &str,
        request: &IntentRequest,
    ) -> Result<CreatedIntent>;
    async fn client_secret(&self, account_id: &str, payment_intent_id: &str) -> Result<String>;
    async fn payment_method_type(
        &self,
        account_id: Option<&str>,
        payment_method_id: &str,
    ) -> std::result::Result<PaymentMethodType, LookupError>;
    /// Sum of processor fees on the balance transactions settled by a payout.
    async fn payout_fees(&self, account_id: &str, payout_id: &str) -> Result<i64>;
}
