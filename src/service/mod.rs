pub mod donation_service;
pub mod maintenance;
pub mod reconciliation_service;

use std::sync::Arc;
use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::payments::{fees::FeeSchedule, PaymentGateway};
use crate::repository::*;
use donation_service::DonationService;
use reconciliation_service::ReconciliationService;

pub use donation_service::InitiationOutcome;
pub use reconciliation_service::WebhookOutcome;

pub struct ServiceContext {
    pub church_repo: Arc<dyn ChurchRepository>,
    pub donation_type_repo: Arc<dyn DonationTypeRepository>,
    pub donor_repo: Arc<dyn DonorRepository>,
    pub donation_repo: Arc<dyn DonationRepository>,
    pub payout_repo: Arc<dyn PayoutRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub clock: Arc<dyn Clock>,
    pub donation_service: Arc<DonationService>,
    pub reconciliation_service: Arc<ReconciliationService>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    pub fn new(
        db_pool: SqlitePool,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        fees: FeeSchedule,
        webhook_retention: chrono::Duration,
    ) -> Self {
        let church_repo: Arc<dyn ChurchRepository> =
            Arc::new(SqliteChurchRepository::new(db_pool.clone()));
        let donation_type_repo: Arc<dyn DonationTypeRepository> =
            Arc::new(SqliteDonationTypeRepository::new(db_pool.clone()));
        let donor_repo: Arc<dyn DonorRepository> =
            Arc::new(SqliteDonorRepository::new(db_pool.clone()));
        let donation_repo: Arc<dyn DonationRepository> =
            Arc::new(SqliteDonationRepository::new(db_pool.clone()));
        let payout_repo: Arc<dyn PayoutRepository> =
            Arc::new(SqlitePayoutRepository::new(db_pool.clone()));

        let donation_service = Arc::new(DonationService::new(
            church_repo.clone(),
            donation_type_repo.clone(),
            donor_repo.clone(),
            donation_repo.clone(),
            gateway.clone(),
            fees,
        ));

        let reconciliation_service = Arc::new(ReconciliationService::new(
            db_pool.clone(),
            church_repo.clone(),
            donation_repo.clone(),
            gateway.clone(),
            clock.clone(),
            webhook_retention,
        ));

        Self {
            church_repo,
            donation_type_repo,
            donor_repo,
            donation_repo,
            payout_repo,
            gateway,
            clock,
            donation_service,
            reconciliation_service,
            db_pool,
        }
    }
}
