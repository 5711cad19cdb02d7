use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{
        Currency, DonationTransaction, NewDonationTransaction, PaymentMethodType,
        TransactionStatus,
    },
    error::{is_unique_violation, AppError, Result},
    repository::{parse_optional_uuid, parse_uuid, to_utc, DonationRepository, InsertOutcome},
};

const TRANSACTION_COLUMNS: &str = r#"
    id, church_id, donor_id, donation_type_id, amount_cents, base_amount_cents,
    currency, status, stripe_payment_intent_id, stripe_customer_id, idempotency_key,
    covered_fee_cents, platform_fee_cents, is_anonymous, is_international,
    donor_language, payment_method_type, failure_message, refunded_amount_cents,
    refunded_at, dispute_id, dispute_status, dispute_reason, processed_at,
    created_at, updated_at
"#;

#[derive(FromRow)]
struct TransactionRow {
    id: String,
    church_id: String,
    donor_id: Option<String>,
    donation_type_id: String,
    amount_cents: i64,
    base_amount_cents: i64,
    currency: String,
    status: String,
    stripe_payment_intent_id: String,
    stripe_customer_id: Option<String>,
    idempotency_key: String,
    covered_fee_cents: i64,
    platform_fee_cents: i64,
    is_anonymous: bool,
    is_international: bool,
    donor_language: String,
    payment_method_type: Option<String>,
    failure_message: Option<String>,
    refunded_amount_cents: i64,
    refunded_at: Option<NaiveDateTime>,
    dispute_id: Option<String>,
    dispute_status: Option<String>,
    dispute_reason: Option<String>,
    processed_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

fn row_to_transaction(row: TransactionRow) -> Result<DonationTransaction> {
    let currency = Currency::parse(&row.currency)
        .ok_or_else(|| AppError::Database(format!("Invalid currency: {}", row.currency)))?;

    Ok(DonationTransaction {
        id: parse_uuid(&row.id)?,
        church_id: parse_uuid(&row.church_id)?,
        donor_id: parse_optional_uuid(row.donor_id)?,
        donation_type_id: parse_uuid(&row.donation_type_id)?,
        amount_cents: row.amount_cents,
        base_amount_cents: row.base_amount_cents,
        currency,
        status: TransactionStatus::try_from(row.status.as_str())?,
        stripe_payment_intent_id: row.stripe_payment_intent_id,
        stripe_customer_id: row.stripe_customer_id,
        idempotency_key: row.idempotency_key,
        covered_fee_cents: row.covered_fee_cents,
        platform_fee_cents: row.platform_fee_cents,
        is_anonymous: row.is_anonymous,
        is_international: row.is_international,
        donor_language: row.donor_language,
        payment_method_type: row
            .payment_method_type
            .as_deref()
            .map(PaymentMethodType::from_stripe),
        failure_message: row.failure_message,
        refunded_amount_cents: row.refunded_amount_cents,
        refunded_at: row.refunded_at.map(to_utc),
        dispute_id: row.dispute_id,
        dispute_status: row.dispute_status,
        dispute_reason: row.dispute_reason,
        processed_at: row.processed_at.map(to_utc),
        created_at: to_utc(row.created_at),
        updated_at: to_utc(row.updated_at),
    })
}

pub struct SqliteDonationRepository {
    pool: SqlitePool,
}

impl SqliteDonationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_where(&self, column: &str, value: String) -> Result<Option<DonationTransaction>> {
        let query = format!(
            "SELECT {} FROM donation_transactions WHERE {} = ?",
            TRANSACTION_COLUMNS, column
        );
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_transaction).transpose()
    }
}

#[async_trait]
impl DonationRepository for SqliteDonationRepository {
    async fn insert_pending(
        &self,
        donation: &NewDonationTransaction,
    ) -> Result<InsertOutcome<DonationTransaction>> {
        let now = Utc::now().naive_utc();

        let inserted = sqlx::query(
            r#"
            INSERT INTO donation_transactions (
                id, church_id, donor_id, donation_type_id, amount_cents, base_amount_cents,
                currency, status, stripe_payment_intent_id, stripe_customer_id, idempotency_key,
                covered_fee_cents, platform_fee_cents, is_anonymous, is_international,
                donor_language, refunded_amount_cents, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(donation.id.to_string())
        .bind(donation.church_id.to_string())
        .bind(donation.donor_id.map(|id| id.to_string()))
        .bind(donation.donation_type_id.to_string())
        .bind(donation.amount_cents)
        .bind(donation.base_amount_cents)
        .bind(donation.currency.as_str())
        .bind(&donation.stripe_payment_intent_id)
        .bind(&donation.stripe_customer_id)
        .bind(&donation.idempotency_key)
        .bind(donation.covered_fee_cents)
        .bind(donation.platform_fee_cents)
        .bind(donation.is_anonymous)
        .bind(donation.is_international)
        .bind(&donation.donor_language)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(InsertOutcome::Conflict),
            Err(e) => return Err(e.into()),
        }

        let created = self
            .find_by_id(donation.id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created transaction".to_string()))?;

        Ok(InsertOutcome::Inserted(created))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DonationTransaction>> {
        self.find_where("id", id.to_string()).await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<DonationTransaction>> {
        self.find_where("idempotency_key", key.to_string()).await
    }

    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<DonationTransaction>> {
        self.find_where("stripe_payment_intent_id", payment_intent_id.to_string())
            .await
    }

    async fn count_by_idempotency_key(&self, key: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM donation_transactions WHERE idempotency_key = ?")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

// Settlement writes. Each runs on the caller's transaction and only touches a
// row still in the expected prior status; `false` means the row moved on.

pub async fn find_by_payment_intent_for_update(
    conn: &mut SqliteConnection,
    payment_intent_id: &str,
) -> Result<Option<DonationTransaction>> {
    let query = format!(
        "SELECT {} FROM donation_transactions WHERE stripe_payment_intent_id = ?",
        TRANSACTION_COLUMNS
    );
    let row = sqlx::query_as::<_, TransactionRow>(&query)
        .bind(payment_intent_id)
        .fetch_optional(conn)
        .await?;

    row.map(row_to_transaction).transpose()
}

pub async fn mark_succeeded(
    conn: &mut SqliteConnection,
    id: Uuid,
    method: PaymentMethodType,
    stripe_customer_id: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE donation_transactions
        SET status = 'succeeded',
            payment_method_type = ?,
            stripe_customer_id = COALESCE(stripe_customer_id, ?),
            processed_at = ?,
            updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(method.as_str())
    .bind(stripe_customer_id)
    .bind(at.naive_utc())
    .bind(at.naive_utc())
    .bind(id.to_string())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_failed(
    conn: &mut SqliteConnection,
    id: Uuid,
    failure_message: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE donation_transactions
        SET status = 'failed', failure_message = ?, processed_at = ?, updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(failure_message)
    .bind(at.naive_utc())
    .bind(at.naive_utc())
    .bind(id.to_string())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record the cumulative refunded amount. A full refund also moves the
/// status to `refunded`; a partial one leaves it `succeeded`.
pub async fn record_refund(
    conn: &mut SqliteConnection,
    id: Uuid,
    refunded_total_cents: i64,
    fully_refunded: bool,
    at: DateTime<Utc>,
) -> Result<bool> {
    let status = if fully_refunded {
        TransactionStatus::Refunded
    } else {
        TransactionStatus::Succeeded
    };

    let result = sqlx::query(
        r#"
        UPDATE donation_transactions
        SET status = ?, refunded_amount_cents = ?, refunded_at = ?, updated_at = ?
        WHERE id = ? AND status = 'succeeded' AND refunded_amount_cents < ?
        "#,
    )
    .bind(status.as_str())
    .bind(refunded_total_cents)
    .bind(at.naive_utc())
    .bind(at.naive_utc())
    .bind(id.to_string())
    .bind(refunded_total_cents)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_disputed(
    conn: &mut SqliteConnection,
    id: Uuid,
    dispute_id: &str,
    dispute_status: &str,
    dispute_reason: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE donation_transactions
        SET status = 'disputed', dispute_id = ?, dispute_status = ?, dispute_reason = ?, updated_at = ?
        WHERE id = ? AND status = 'succeeded'
        "#,
    )
    .bind(dispute_id)
    .bind(dispute_status)
    .bind(dispute_reason)
    .bind(at.naive_utc())
    .bind(id.to_string())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Update the dispute sub-state; the transaction stays `disputed`.
pub async fn update_dispute_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    dispute_id: &str,
    dispute_status: &str,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE donation_transactions
        SET dispute_status = ?, updated_at = ?
        WHERE id = ? AND status = 'disputed' AND dispute_id = ?
        "#,
    )
    .bind(dispute_status)
    .bind(at.naive_utc())
    .bind(id.to_string())
    .bind(dispute_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}
