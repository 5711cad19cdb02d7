pub mod extract;
pub mod handlers;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;

use crate::{payments::WebhookVerifier, service::ServiceContext};
use state::AppState;

pub fn create_app(service_context: Arc<ServiceContext>, verifier: Arc<WebhookVerifier>) -> Router {
    let app_state = AppState::new(service_context, verifier);

    Router::new()
        .route("/health", get(handlers::root::health_check))
        .nest("/api", api_routes())
        .with_state(app_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new()),
        )
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/donations", post(handlers::donations::initiate))
        // Stripe signs the raw body; this route must not sit behind anything
        // that rewrites it.
        .route("/webhooks/stripe", post(handlers::webhooks::stripe_webhook))
}
