//! Applies verified Stripe events to local donation and payout records.
//!
//! Every state-changing event runs in one SQLite transaction that also claims
//! the event's dedup marker, so an event either lands completely (marker
//! included) or not at all and Stripe redelivers it. Calls to Stripe happen
//! before the transaction opens.

use std::sync::Arc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    clock::Clock,
    domain::{
        DonationTransaction, PaymentMethodType, PayoutStatus, PayoutUpdate, TransactionStatus,
    },
    error::Result,
    payments::{
        webhook::{
            ChargeObject, DisputeObject, PaymentIntentObject, PayoutObject, StripeEvent,
            VerifiedEvent,
        },
        LookupResultExt, PaymentGateway,
    },
    repository::{
        donation_repository, donor_repository, payout_repository, webhook_event_repository,
        ChurchRepository, DonationRepository,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    /// The event id already has a live marker.
    Duplicate,
    /// No local transaction matches; nothing was written.
    TransactionNotFound,
    /// Recognized but nothing to change (redelivery of the current state,
    /// or an event type this service does not track).
    Ignored,
    /// The event conflicts with local state. Marker recorded, nothing changed.
    Anomaly(String),
    /// Signed by Stripe but its object could not be decoded.
    Unprocessable,
}

impl WebhookOutcome {
    /// Warning surfaced to Stripe in the acknowledgement body.
    pub fn warning(&self) -> Option<&'static str> {
        match self {
            Self::TransactionNotFound => Some("Transaction not found"),
            Self::Unprocessable => Some("Unprocessable event payload"),
            _ => None,
        }
    }
}

/// Which tenant, if any, the sending connected account belongs to.
#[derive(Debug, Clone)]
enum AccountOwner {
    Platform,
    Church { church_id: Uuid, account_id: String },
    Unknown(String),
}

/// Provider data fetched before the settlement transaction.
#[derive(Debug, Default)]
struct Enrichment {
    payment_method: Option<PaymentMethodType>,
    payout_fees: Option<i64>,
}

pub struct ReconciliationService {
    pool: SqlitePool,
    church_repo: Arc<dyn ChurchRepository>,
    donation_repo: Arc<dyn DonationRepository>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
}

impl ReconciliationService {
    pub fn new(
        pool: SqlitePool,
        church_repo: Arc<dyn ChurchRepository>,
        donation_repo: Arc<dyn DonationRepository>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            pool,
            church_repo,
            donation_repo,
            gateway,
            clock,
            retention,
        }
    }

    pub async fn handle_event(&self, event: VerifiedEvent) -> Result<WebhookOutcome> {
        let now = self.clock.now();

        if webhook_event_repository::is_processed(&self.pool, &event.id, now).await? {
            tracing::info!(event_id = %event.id, event_type = %event.event_type, "Duplicate webhook delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        let classified = match event.classify() {
            Ok(classified) => classified,
            Err(e) => {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Unprocessable event payload"
                );
                return Ok(WebhookOutcome::Unprocessable);
            }
        };

        let owner = self.resolve_owner(event.account.as_deref()).await?;
        let enrichment = self.enrich(&event, &classified, &owner).await?;

        let mut tx = self.pool.begin().await?;

        let expires_at = now + self.retention;
        if !webhook_event_repository::claim(&mut *tx, &event.id, &event.event_type, now, expires_at)
            .await?
        {
            tx.rollback().await?;
            tracing::info!(event_id = %event.id, "Webhook claimed by a concurrent delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        let outcome = self.apply(&mut *tx, classified, &owner, enrichment).await?;

        if outcome == WebhookOutcome::TransactionNotFound {
            // Leave no marker so a redelivery after the row appears still applies.
            tx.rollback().await?;
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Transaction not found for webhook event"
            );
            return Ok(outcome);
        }

        tx.commit().await?;

        match &outcome {
            WebhookOutcome::Anomaly(reason) => tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                reason = %reason,
                "Webhook event conflicts with local state"
            ),
            WebhookOutcome::Applied => tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Webhook event applied"
            ),
            _ => tracing::debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Webhook event acknowledged"
            ),
        }

        Ok(outcome)
    }

    async fn resolve_owner(&self, account: Option<&str>) -> Result<AccountOwner> {
        let Some(account_id) = account else {
            return Ok(AccountOwner::Platform);
        };
        Ok(
            match self
                .church_repo
                .find_connect_account_by_stripe_id(account_id)
                .await?
            {
                Some(account) => AccountOwner::Church {
                    church_id: account.church_id,
                    account_id: account.stripe_account_id,
                },
                None => AccountOwner::Unknown(account_id.to_string()),
            },
        )
    }

    async fn enrich(
        &self,
        event: &VerifiedEvent,
        classified: &StripeEvent,
        owner: &AccountOwner,
    ) -> Result<Enrichment> {
        let mut enrichment = Enrichment::default();

        match classified {
            StripeEvent::PaymentSucceeded(intent) => {
                // Only worth a provider call when the row is still waiting on it.
                let pending = self
                    .donation_repo
                    .find_by_payment_intent(&intent.id)
                    .await?
                    .map(|row| row.status == TransactionStatus::Pending)
                    .unwrap_or(false);
                if pending {
                    enrichment.payment_method = Some(match intent.payment_method.as_deref() {
                        Some(method) => self
                            .gateway
                            .payment_method_type(event.account.as_deref(), method)
                            .await
                            .or_default_method(method),
                        None => PaymentMethodType::default(),
                    });
                }
            }
            StripeEvent::PayoutReconciled(payout) => {
                if let AccountOwner::Church { account_id, .. } = owner {
                    enrichment.payout_fees =
                        Some(self.gateway.payout_fees(account_id, &payout.id).await?);
                }
            }
            _ => {}
        }

        Ok(enrichment)
    }

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        classified: StripeEvent,
        owner: &AccountOwner,
        enrichment: Enrichment,
    ) -> Result<WebhookOutcome> {
        let now = self.clock.now();

        match classified {
            StripeEvent::PaymentSucceeded(intent) => {
                let row = match owned_row(conn, Some(intent.id.as_str()), owner).await? {
                    Ok(row) => row,
                    Err(outcome) => return Ok(outcome),
                };
                self.payment_succeeded(conn, row, &intent, enrichment.payment_method, now)
                    .await
            }
            StripeEvent::PaymentFailed(intent) => {
                let row = match owned_row(conn, Some(intent.id.as_str()), owner).await? {
                    Ok(row) => row,
                    Err(outcome) => return Ok(outcome),
                };
                payment_failed(conn, row, &intent, now).await
            }
            StripeEvent::ChargeRefunded(charge) => {
                let payment_intent = charge.payment_intent.as_deref();
                let row = match owned_row(conn, payment_intent, owner).await? {
                    Ok(row) => row,
                    Err(outcome) => return Ok(outcome),
                };
                charge_refunded(conn, row, &charge, now).await
            }
            StripeEvent::DisputeCreated(dispute) => {
                let payment_intent = dispute.payment_intent.as_deref();
                let row = match owned_row(conn, payment_intent, owner).await? {
                    Ok(row) => row,
                    Err(outcome) => return Ok(outcome),
                };
                dispute_created(conn, row, &dispute, now).await
            }
            StripeEvent::DisputeClosed(dispute) => {
                let payment_intent = dispute.payment_intent.as_deref();
                let row = match owned_row(conn, payment_intent, owner).await? {
                    Ok(row) => row,
                    Err(outcome) => return Ok(outcome),
                };
                dispute_closed(conn, row, &dispute, now).await
            }
            StripeEvent::PayoutChanged(payout) => {
                let church_id = match owner {
                    AccountOwner::Church { church_id, .. } => *church_id,
                    other => return Ok(unowned_payout(other)),
                };
                upsert_payout(conn, church_id, &payout, now).await
            }
            StripeEvent::PayoutReconciled(payout) => {
                let church_id = match owner {
                    AccountOwner::Church { church_id, .. } => *church_id,
                    other => return Ok(unowned_payout(other)),
                };
                let Some(fees) = enrichment.payout_fees else {
                    return Ok(WebhookOutcome::Anomaly("Payout fees unavailable".to_string()));
                };
                let outcome = upsert_payout(conn, church_id, &payout, now).await?;
                if outcome != WebhookOutcome::Applied {
                    return Ok(outcome);
                }
                payout_repository::mark_reconciled(conn, &payout.id, fees, now).await?;
                tracing::info!(payout = %payout.id, fees_cents = fees, "Payout reconciled");
                Ok(WebhookOutcome::Applied)
            }
            StripeEvent::Unrecognized => Ok(WebhookOutcome::Ignored),
        }
    }

    async fn payment_succeeded(
        &self,
        conn: &mut SqliteConnection,
        row: DonationTransaction,
        intent: &PaymentIntentObject,
        method: Option<PaymentMethodType>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<WebhookOutcome> {
        if let Some(outcome) = check_transition(&row, TransactionStatus::Succeeded) {
            return Ok(outcome);
        }

        let customer = intent
            .customer
            .clone()
            .or_else(|| row.stripe_customer_id.clone());
        let method = method.unwrap_or_default();

        if !donation_repository::mark_succeeded(conn, row.id, method, customer.as_deref(), now)
            .await?
        {
            return Ok(moved_on(&row));
        }
        if let Some(donor_id) = row.donor_id {
            donor_repository::record_gift(
                conn,
                donor_id,
                customer.as_deref(),
                row.base_amount_cents,
                now,
            )
            .await?;
        }

        tracing::info!(
            transaction_id = %row.id,
            payment_intent = %intent.id,
            payment_method = %method.as_str(),
            "Donation succeeded"
        );
        Ok(WebhookOutcome::Applied)
    }
}

/// Load the transaction behind a payment intent, checking that the sending
/// connected account owns it. `Err` carries the outcome to report instead.
async fn owned_row(
    conn: &mut SqliteConnection,
    payment_intent: Option<&str>,
    owner: &AccountOwner,
) -> Result<std::result::Result<DonationTransaction, WebhookOutcome>> {
    let Some(payment_intent) = payment_intent else {
        return Ok(Err(WebhookOutcome::TransactionNotFound));
    };
    let Some(row) = donation_repository::find_by_payment_intent_for_update(conn, payment_intent).await?
    else {
        return Ok(Err(WebhookOutcome::TransactionNotFound));
    };

    Ok(match owner {
        AccountOwner::Platform => Ok(row),
        AccountOwner::Church { church_id, .. } if *church_id == row.church_id => Ok(row),
        AccountOwner::Church { account_id, .. } | AccountOwner::Unknown(account_id) => {
            Err(WebhookOutcome::Anomaly(format!(
                "Account {} does not own transaction {}",
                account_id, row.id
            )))
        }
    })
}

/// `None` when the move is allowed; otherwise the outcome to report.
fn check_transition(row: &DonationTransaction, next: TransactionStatus) -> Option<WebhookOutcome> {
    if row.status == next {
        return Some(WebhookOutcome::Ignored);
    }
    if !row.status.can_transition_to(&next) {
        return Some(WebhookOutcome::Anomaly(format!(
            "Transaction {} cannot move from {} to {}",
            row.id, row.status, next
        )));
    }
    None
}

fn moved_on(row: &DonationTransaction) -> WebhookOutcome {
    WebhookOutcome::Anomaly(format!(
        "Transaction {} changed while the event was applied",
        row.id
    ))
}

fn unowned_payout(owner: &AccountOwner) -> WebhookOutcome {
    match owner {
        AccountOwner::Unknown(account_id) => {
            WebhookOutcome::Anomaly(format!("Payout from unknown account {}", account_id))
        }
        _ => WebhookOutcome::Anomaly("Payout event without a connected account".to_string()),
    }
}

async fn payment_failed(
    conn: &mut SqliteConnection,
    row: DonationTransaction,
    intent: &PaymentIntentObject,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<WebhookOutcome> {
    if let Some(outcome) = check_transition(&row, TransactionStatus::Failed) {
        return Ok(outcome);
    }

    let message = intent.failure_message.as_deref();
    if !donation_repository::mark_failed(conn, row.id, message, now).await? {
        return Ok(moved_on(&row));
    }

    tracing::info!(
        transaction_id = %row.id,
        payment_intent = %intent.id,
        failure = message.unwrap_or("unknown"),
        "Donation failed"
    );
    Ok(WebhookOutcome::Applied)
}

async fn charge_refunded(
    conn: &mut SqliteConnection,
    row: DonationTransaction,
    charge: &ChargeObject,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<WebhookOutcome> {
    let delta = charge.amount_refunded - row.refunded_amount_cents;
    if delta <= 0 {
        return Ok(WebhookOutcome::Ignored);
    }
    if row.status != TransactionStatus::Succeeded {
        return Ok(WebhookOutcome::Anomaly(format!(
            "Refund on transaction {} in status {}",
            row.id, row.status
        )));
    }

    let fully_refunded = charge.refunded || charge.amount_refunded >= row.amount_cents;
    if !donation_repository::record_refund(conn, row.id, charge.amount_refunded, fully_refunded, now)
        .await?
    {
        return Ok(moved_on(&row));
    }
    if let Some(donor_id) = row.donor_id {
        let gift_delta = row.refunded_gift_cents(charge.amount_refunded)
            - row.refunded_gift_cents(row.refunded_amount_cents);
        if gift_delta > 0 {
            donor_repository::deduct_refund(conn, donor_id, gift_delta, now).await?;
        }
    }

    tracing::info!(
        transaction_id = %row.id,
        charge = %charge.id,
        refunded_cents = charge.amount_refunded,
        fully_refunded,
        "Donation refunded"
    );
    Ok(WebhookOutcome::Applied)
}

async fn dispute_created(
    conn: &mut SqliteConnection,
    row: DonationTransaction,
    dispute: &DisputeObject,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<WebhookOutcome> {
    if let Some(outcome) = check_transition(&row, TransactionStatus::Disputed) {
        return Ok(outcome);
    }

    if !donation_repository::mark_disputed(
        conn,
        row.id,
        &dispute.id,
        &dispute.status,
        Some(dispute.reason.as_str()),
        now,
    )
    .await?
    {
        return Ok(moved_on(&row));
    }

    tracing::warn!(
        transaction_id = %row.id,
        dispute = %dispute.id,
        reason = %dispute.reason,
        "Donation disputed"
    );
    Ok(WebhookOutcome::Applied)
}

async fn dispute_closed(
    conn: &mut SqliteConnection,
    row: DonationTransaction,
    dispute: &DisputeObject,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<WebhookOutcome> {
    if row.status != TransactionStatus::Disputed || row.dispute_id.as_deref() != Some(dispute.id.as_str()) {
        return Ok(WebhookOutcome::Anomaly(format!(
            "Dispute {} is not open on transaction {}",
            dispute.id, row.id
        )));
    }
    if row.dispute_status.as_deref() == Some(dispute.status.as_str()) {
        return Ok(WebhookOutcome::Ignored);
    }

    if !donation_repository::update_dispute_status(conn, row.id, &dispute.id, &dispute.status, now)
        .await?
    {
        return Ok(moved_on(&row));
    }

    tracing::info!(
        transaction_id = %row.id,
        dispute = %dispute.id,
        status = %dispute.status,
        "Dispute closed"
    );
    Ok(WebhookOutcome::Applied)
}

async fn upsert_payout(
    conn: &mut SqliteConnection,
    church_id: Uuid,
    payout: &PayoutObject,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<WebhookOutcome> {
    let Some(status) = PayoutStatus::parse(&payout.status) else {
        return Ok(WebhookOutcome::Anomaly(format!(
            "Unknown payout status {}",
            payout.status
        )));
    };

    let Some(arrival_date) = payout.arrival() else {
        return Ok(WebhookOutcome::Anomaly(format!(
            "Payout {} has an invalid arrival date",
            payout.id
        )));
    };

    let update = PayoutUpdate {
        church_id,
        stripe_payout_id: payout.id.clone(),
        amount_cents: payout.amount,
        currency: payout.currency.clone(),
        status,
        arrival_date,
    };
    payout_repository::upsert(conn, &update, now).await?;

    tracing::info!(payout = %payout.id, status = %status.as_str(), "Payout recorded");
    Ok(WebhookOutcome::Applied)
}
