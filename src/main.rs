use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use offertory::{
    api,
    clock::{Clock, SystemClock},
    config::Settings,
    payments::{StripeGateway, WebhookVerifier},
    service::{maintenance, ServiceContext},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "offertory=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    let secret_key = settings
        .stripe
        .secret_key
        .clone()
        .filter(|key| !key.is_empty())
        .context("OFFERTORY__STRIPE__SECRET_KEY is required")?;
    let webhook_secret = settings
        .stripe
        .webhook_secret
        .clone()
        .filter(|secret| !secret.is_empty())
        .context("OFFERTORY__STRIPE__WEBHOOK_SECRET is required")?;
    if settings.stripe.connect_webhook_secret.is_none() {
        tracing::warn!("No connect webhook secret configured; connected-account events will be rejected");
    }

    tracing::info!("Starting Offertory server on {}:{}", settings.server.host, settings.server.port);

    // Initialize database
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway = Arc::new(StripeGateway::new(secret_key));

    let service_context = Arc::new(ServiceContext::new(
        db_pool.clone(),
        gateway,
        clock.clone(),
        settings.fees.schedule(),
        chrono::Duration::hours(settings.webhooks.retention_hours),
    ));

    let verifier = Arc::new(WebhookVerifier::new(
        webhook_secret,
        settings.stripe.connect_webhook_secret.clone(),
        clock.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let purge = tokio::spawn(maintenance::run_webhook_purge(
        db_pool.clone(),
        clock,
        Duration::from_secs(settings.webhooks.purge_interval_secs),
        shutdown_rx,
    ));

    let app = api::create_app(service_context, verifier);

    let listener = tokio::net::TcpListener::bind(
        format!("{}:{}", settings.server.host, settings.server.port)
    ).await?;

    tracing::info!("Server listening on http://{}:{}", settings.server.host, settings.server.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped, waiting for background tasks");
    let _ = shutdown_tx.send(true);
    let _ = purge.await;
    db_pool.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
