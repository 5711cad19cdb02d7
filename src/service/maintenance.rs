use std::sync::Arc;
use std::time::Duration;
use sqlx::SqlitePool;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::repository::webhook_event_repository;

/// Periodically delete webhook markers past their retention window.
pub async fn run_webhook_purge(
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "webhook marker purge started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("webhook marker purge shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match webhook_event_repository::purge_expired(&pool, clock.now()).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "purged expired webhook markers"),
            Err(e) => tracing::error!(error = %e, "webhook marker purge error"),
        }
    }
}
