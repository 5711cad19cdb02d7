use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::domain::*;
use crate::error::{AppError, Result};

pub mod church_repository;
pub mod donation_repository;
pub mod donation_type_repository;
pub mod donor_repository;
pub mod payout_repository;
pub mod webhook_event_repository;

pub use church_repository::SqliteChurchRepository;
pub use donation_repository::SqliteDonationRepository;
pub use donation_type_repository::SqliteDonationTypeRepository;
pub use donor_repository::SqliteDonorRepository;
pub use payout_repository::SqlitePayoutRepository;

/// Result of inserting a row guarded by unique indexes.
#[derive(Debug)]
pub enum InsertOutcome<T> {
    Inserted(T),
    /// Another writer holds the unique key; re-read its row.
    Conflict,
}

#[derive(Debug, Clone)]
pub struct NewChurch {
    pub name: String,
    pub onboarding_completed: bool,
    pub subscription_status: SubscriptionStatus,
}

#[derive(Debug, Clone)]
pub struct NewConnectAccount {
    pub church_id: Uuid,
    pub stripe_account_id: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}

#[async_trait]
pub trait ChurchRepository: Send + Sync {
    async fn create(&self, church: NewChurch) -> Result<Church>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Church>>;
    async fn update_status(
        &self,
        id: Uuid,
        onboarding_completed: bool,
        subscription_status: SubscriptionStatus,
    ) -> Result<Church>;
    async fn create_connect_account(&self, account: NewConnectAccount) -> Result<StripeConnectAccount>;
    async fn find_connect_account(&self, church_id: Uuid) -> Result<Option<StripeConnectAccount>>;
    async fn find_connect_account_by_stripe_id(
        &self,
        stripe_account_id: &str,
    ) -> Result<Option<StripeConnectAccount>>;
    async fn set_charges_enabled(&self, church_id: Uuid, enabled: bool) -> Result<()>;
}

#[async_trait]
pub trait DonationTypeRepository: Send + Sync {
    async fn create(&self, church_id: Uuid, name: &str) -> Result<DonationType>;
    /// Scoped to the church: a type owned by another tenant is never returned.
    async fn find_for_church(&self, id: Uuid, church_id: Uuid) -> Result<Option<DonationType>>;
    async fn list_for_church(&self, church_id: Uuid) -> Result<Vec<DonationType>>;
    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<()>;
}

#[async_trait]
pub trait DonorRepository: Send + Sync {
    /// Insert or refresh the donor identified by (church, email).
    async fn upsert(&self, church_id: Uuid, contact: &DonorContact) -> Result<Donor>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Donor>>;
    async fn find_by_email(&self, church_id: Uuid, email: &str) -> Result<Option<Donor>>;
}

#[async_trait]
pub trait DonationRepository: Send + Sync {
    async fn insert_pending(
        &self,
        donation: &NewDonationTransaction,
    ) -> Result<InsertOutcome<DonationTransaction>>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<DonationTransaction>>;
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<DonationTransaction>>;
    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<DonationTransaction>>;
    async fn count_by_idempotency_key(&self, key: &str) -> Result<i64>;
}

#[async_trait]
pub trait PayoutRepository: Send + Sync {
    async fn find_by_payout_id(&self, stripe_payout_id: &str) -> Result<Option<PayoutSummary>>;
    async fn list_for_church(&self, church_id: Uuid) -> Result<Vec<PayoutSummary>>;
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| AppError::Database(e.to_string()))
}

pub(crate) fn parse_optional_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

pub(crate) fn to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(naive, Utc)
}
