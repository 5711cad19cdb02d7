use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::Serialize;

use crate::{
    api::state::AppState,
    error::{AppError, Result},
    payments::SIGNATURE_HEADER,
    service::WebhookOutcome,
};

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<&'static str>,
}

/// Stripe delivery endpoint. Any error other than a 4xx rejection surfaces
/// as 500, which makes Stripe redeliver the event later.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    if body.is_empty() {
        return Err(AppError::BadRequest("Empty request body.".to_string()));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing stripe-signature header.".to_string()))?;

    let verified = state.verifier.verify(&body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Webhook signature verification failed");
        AppError::SignatureVerification(e.to_string())
    })?;

    tracing::debug!(
        event_id = %verified.id,
        event_type = %verified.event_type,
        secret = ?verified.secret,
        "Webhook verified"
    );

    let outcome = state
        .service_context
        .reconciliation_service
        .handle_event(verified)
        .await?;

    Ok(Json(WebhookAck {
        received: true,
        duplicate: (outcome == WebhookOutcome::Duplicate).then_some(true),
        warning: outcome.warning(),
    }))
}
