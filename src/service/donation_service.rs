use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{
        Currency, DonationReceipt, DonationTransaction, DonorContact, InitiateDonationRequest,
        NewDonationTransaction, StripeConnectAccount, TransactionStatus,
    },
    error::{AppError, Result},
    payments::{
        fees::FeeSchedule, payment_method_types, CustomerDetails, IntentRequest, PaymentGateway,
    },
    repository::{
        ChurchRepository, DonationRepository, DonationTypeRepository, DonorRepository,
        InsertOutcome,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiationOutcome {
    Created(DonationReceipt),
    /// Same idempotency key seen before; the original intent is handed back.
    Replayed(DonationReceipt),
}

pub struct DonationService {
    church_repo: Arc<dyn ChurchRepository>,
    donation_type_repo: Arc<dyn DonationTypeRepository>,
    donor_repo: Arc<dyn DonorRepository>,
    donation_repo: Arc<dyn DonationRepository>,
    gateway: Arc<dyn PaymentGateway>,
    fees: FeeSchedule,
}

impl DonationService {
    pub fn new(
        church_repo: Arc<dyn ChurchRepository>,
        donation_type_repo: Arc<dyn DonationTypeRepository>,
        donor_repo: Arc<dyn DonorRepository>,
        donation_repo: Arc<dyn DonationRepository>,
        gateway: Arc<dyn PaymentGateway>,
        fees: FeeSchedule,
    ) -> Self {
        Self {
            church_repo,
            donation_type_repo,
            donor_repo,
            donation_repo,
            gateway,
            fees,
        }
    }

    /// Create a pending donation and its payment intent on the church's
    /// connected account, or replay the one already tied to the key.
    pub async fn initiate(&self, request: InitiateDonationRequest) -> Result<InitiationOutcome> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let currency = Currency::parse(&request.currency)
            .ok_or_else(|| AppError::Validation(format!("Unsupported currency: {}", request.currency)))?;

        if let Some(existing) = self
            .donation_repo
            .find_by_idempotency_key(&request.idempotency_key)
            .await?
        {
            return self.replay(existing, request.church_id).await;
        }

        let church = self
            .church_repo
            .find_by_id(request.church_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Church not found".to_string()))?;

        if church.subscription_status.blocks_donations() {
            return Err(AppError::Forbidden(format!(
                "Donations are disabled while the subscription is {}",
                church.subscription_status
            )));
        }
        if !church.onboarding_completed {
            return Err(AppError::BadRequest(
                "Church has not completed onboarding".to_string(),
            ));
        }

        let donation_type = self
            .donation_type_repo
            .find_for_church(request.donation_type_id, church.id)
            .await?
            .ok_or_else(|| AppError::NotFound("Donation type not found".to_string()))?;
        if !donation_type.is_active {
            return Err(AppError::BadRequest("Donation type is not active".to_string()));
        }

        let account = self.charge_account(church.id).await?;

        let fees = self
            .fees
            .calculate(request.base_amount, request.cover_fees)
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let contact = request.contact();

        let donor_id = if request.is_anonymous {
            None
        } else {
            Some(self.donor_repo.upsert(church.id, &contact).await?.id)
        };

        let customer_id = self
            .ensure_customer(&account.stripe_account_id, &contact)
            .await?;

        let mut metadata = HashMap::new();
        metadata.insert("church_id".to_string(), church.id.to_string());
        metadata.insert("donation_type_id".to_string(), donation_type.id.to_string());
        metadata.insert("idempotency_key".to_string(), request.idempotency_key.clone());
        metadata.insert("base_amount".to_string(), request.base_amount.to_string());
        metadata.insert("cover_fees".to_string(), request.cover_fees.to_string());
        metadata.insert("donor_language".to_string(), request.donor_language.clone());

        let intent = self
            .gateway
            .create_payment_intent(
                &account.stripe_account_id,
                &IntentRequest {
                    amount_cents: fees.charge_cents,
                    currency,
                    customer_id: customer_id.clone(),
                    application_fee_cents: fees.platform_fee_cents,
                    receipt_email: contact.email.clone(),
                    description: format!("{} - {}", church.name, donation_type.name),
                    metadata,
                    payment_method_types: payment_method_types(currency),
                    idempotency_key: format!(
                        "donation-intent:{}:{}",
                        church.id, request.idempotency_key
                    ),
                },
            )
            .await?;

        let new_transaction = NewDonationTransaction {
            id: Uuid::new_v4(),
            church_id: church.id,
            donor_id,
            donation_type_id: donation_type.id,
            amount_cents: fees.charge_cents,
            base_amount_cents: request.base_amount,
            currency,
            stripe_payment_intent_id: intent.id.clone(),
            stripe_customer_id: Some(customer_id),
            idempotency_key: request.idempotency_key.clone(),
            covered_fee_cents: fees.covered_by_donor_cents(request.base_amount),
            platform_fee_cents: fees.platform_fee_cents,
            is_anonymous: request.is_anonymous,
            is_international: contact.is_international(),
            donor_language: request.donor_language.clone(),
        };

        match self.donation_repo.insert_pending(&new_transaction).await? {
            InsertOutcome::Inserted(transaction) => {
                tracing::info!(
                    transaction_id = %transaction.id,
                    church_id = %church.id,
                    payment_intent = %intent.id,
                    amount = transaction.amount_cents,
                    "Donation initiated"
                );
                Ok(InitiationOutcome::Created(DonationReceipt {
                    client_secret: intent.client_secret,
                    transaction_id: transaction.id,
                    stripe_account: account.stripe_account_id,
                    amount: transaction.amount_cents,
                }))
            }
            InsertOutcome::Conflict => {
                // A concurrent request with the same key won the insert.
                let winner = match self
                    .donation_repo
                    .find_by_idempotency_key(&request.idempotency_key)
                    .await?
                {
                    Some(row) => Some(row),
                    None => self.donation_repo.find_by_payment_intent(&intent.id).await?,
                };
                let winner = winner.ok_or_else(|| {
                    AppError::Internal("Conflicting donation row disappeared".to_string())
                })?;
                tracing::debug!(
                    transaction_id = %winner.id,
                    "Recovered concurrent initiation"
                );
                self.replay(winner, church.id).await
            }
        }
    }

    async fn replay(
        &self,
        existing: DonationTransaction,
        church_id: Uuid,
    ) -> Result<InitiationOutcome> {
        if existing.church_id != church_id {
            return Err(AppError::Conflict(
                "Idempotency key has already been used".to_string(),
            ));
        }
        if existing.status != TransactionStatus::Pending {
            return Err(AppError::Conflict(format!(
                "Donation already processed ({})",
                existing.status
            )));
        }

        let account = self
            .church_repo
            .find_connect_account(existing.church_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Stripe account not connected".to_string()))?;
        let client_secret = self
            .gateway
            .client_secret(&account.stripe_account_id, &existing.stripe_payment_intent_id)
            .await?;

        Ok(InitiationOutcome::Replayed(DonationReceipt {
            client_secret,
            transaction_id: existing.id,
            stripe_account: account.stripe_account_id,
            amount: existing.amount_cents,
        }))
    }

    async fn charge_account(&self, church_id: Uuid) -> Result<StripeConnectAccount> {
        let account = self
            .church_repo
            .find_connect_account(church_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Stripe account not connected".to_string()))?;
        if !account.charges_enabled {
            return Err(AppError::BadRequest(
                "Stripe account is not enabled for charges".to_string(),
            ));
        }
        Ok(account)
    }

    /// Find the donor's customer on the connected account by email, refreshing
    /// its contact details, or create one.
    async fn ensure_customer(&self, account_id: &str, contact: &DonorContact) -> Result<String> {
        let details = CustomerDetails {
            email: contact.email.clone(),
            name: contact.full_name(),
            phone: contact.phone.clone(),
            address: contact.address.clone(),
        };

        match self
            .gateway
            .find_customer_by_email(account_id, &contact.email)
            .await?
        {
            Some(customer_id) => {
                self.gateway
                    .update_customer(account_id, &customer_id, &details)
                    .await?;
                Ok(customer_id)
            }
            None => self.gateway.create_customer(account_id, &details).await,
        }
    }
}
