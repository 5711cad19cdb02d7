use axum::{extract::State, http::StatusCode, Json};

use crate::{
    api::{extract::ApiJson, state::AppState},
    domain::{DonationReceipt, InitiateDonationRequest},
    error::Result,
    service::InitiationOutcome,
};

/// `201` for a new donation, `200` when the idempotency key is replayed.
pub async fn initiate(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<InitiateDonationRequest>,
) -> Result<(StatusCode, Json<DonationReceipt>)> {
    match state
        .service_context
        .donation_service
        .initiate(request)
        .await?
    {
        InitiationOutcome::Created(receipt) => Ok((StatusCode::CREATED, Json(receipt))),
        InitiationOutcome::Replayed(receipt) => Ok((StatusCode::OK, Json(receipt))),
    }
}
