//! Delivery markers for Stripe events. A marker younger than its
//! `expires_at` means the event was fully applied and must not run again.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite};

use crate::error::Result;

pub async fn is_processed<'e, E>(executor: E, event_id: &str, now: DateTime<Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM webhook_events WHERE stripe_event_id = ? AND expires_at > ?",
    )
    .bind(event_id)
    .bind(now.naive_utc())
    .fetch_one(executor)
    .await?;

    Ok(count > 0)
}

/// Claim an event for processing. Returns `false` when a live marker already
/// exists; an expired marker is taken over.
pub async fn claim<'e, E>(
    executor: E,
    event_id: &str,
    event_type: &str,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO webhook_events (stripe_event_id, event_type, processed_at, expires_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (stripe_event_id) DO UPDATE SET
            event_type = excluded.event_type,
            processed_at = excluded.processed_at,
            expires_at = excluded.expires_at
        WHERE webhook_events.expires_at <= excluded.processed_at
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .bind(now.naive_utc())
    .bind(expires_at.naive_utc())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn purge_expired<'e, E>(executor: E, now: DateTime<Utc>) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM webhook_events WHERE expires_at <= ?")
        .bind(now.naive_utc())
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}
