use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{PayoutStatus, PayoutSummary, PayoutUpdate},
    error::{AppError, Result},
    repository::{parse_uuid, to_utc, PayoutRepository},
};

#[derive(FromRow)]
struct PayoutRow {
    id: String,
    church_id: String,
    stripe_payout_id: String,
    amount_cents: i64,
    currency: String,
    status: String,
    arrival_date: NaiveDateTime,
    total_fees_cents: Option<i64>,
    reconciled_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

fn row_to_payout(row: PayoutRow) -> Result<PayoutSummary> {
    Ok(PayoutSummary {
        id: parse_uuid(&row.id)?,
        church_id: parse_uuid(&row.church_id)?,
        stripe_payout_id: row.stripe_payout_id,
        amount_cents: row.amount_cents,
        currency: row.currency,
        status: PayoutStatus::parse(&row.status)
            .ok_or_else(|| AppError::Database(format!("Invalid payout status: {}", row.status)))?,
        arrival_date: to_utc(row.arrival_date),
        total_fees_cents: row.total_fees_cents,
        reconciled_at: row.reconciled_at.map(to_utc),
        created_at: to_utc(row.created_at),
        updated_at: to_utc(row.updated_at),
    })
}

pub struct SqlitePayoutRepository {
    pool: SqlitePool,
}

impl SqlitePayoutRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PayoutRepository for SqlitePayoutRepository {
    async fn find_by_payout_id(&self, stripe_payout_id: &str) -> Result<Option<PayoutSummary>> {
        let row = sqlx::query_as::<_, PayoutRow>(
            r#"
            SELECT id, church_id, stripe_payout_id, amount_cents, currency, status,
                   arrival_date, total_fees_cents, reconciled_at, created_at, updated_at
            FROM payout_summaries
            WHERE stripe_payout_id = ?
            "#,
        )
        .bind(stripe_payout_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_payout).transpose()
    }

    async fn list_for_church(&self, church_id: Uuid) -> Result<Vec<PayoutSummary>> {
        let rows = sqlx::query_as::<_, PayoutRow>(
            r#"
            SELECT id, church_id, stripe_payout_id, amount_cents, currency, status,
                   arrival_date, total_fees_cents, reconciled_at, created_at, updated_at
            FROM payout_summaries
            WHERE church_id = ?
            ORDER BY arrival_date DESC
            "#,
        )
        .bind(church_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_payout).collect()
    }
}

/// Insert the payout or refresh its reported fields. Reconciliation data is
/// never touched here.
pub async fn upsert(conn: &mut SqliteConnection, update: &PayoutUpdate, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO payout_summaries (
            id, church_id, stripe_payout_id, amount_cents, currency, status,
            arrival_date, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (stripe_payout_id) DO UPDATE SET
            amount_cents = excluded.amount_cents,
            currency = excluded.currency,
            status = excluded.status,
            arrival_date = excluded.arrival_date,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(update.church_id.to_string())
    .bind(&update.stripe_payout_id)
    .bind(update.amount_cents)
    .bind(&update.currency)
    .bind(update.status.as_str())
    .bind(update.arrival_date.naive_utc())
    .bind(at.naive_utc())
    .bind(at.naive_utc())
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn mark_reconciled(
    conn: &mut SqliteConnection,
    stripe_payout_id: &str,
    total_fees_cents: i64,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE payout_summaries
        SET total_fees_cents = ?, reconciled_at = ?, updated_at = ?
        WHERE stripe_payout_id = ?
        "#,
    )
    .bind(total_fees_cents)
    .bind(at.naive_utc())
    .bind(at.naive_utc())
    .bind(stripe_payout_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}
