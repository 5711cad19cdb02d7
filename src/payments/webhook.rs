//! Stripe webhook verification and event classification.
//!
//! Platform events and connected-account events are delivered to separately
//! registered endpoints, each with its own signing secret, so a payload is
//! accepted if `stripe::Webhook` verifies it against either one. Stripe's
//! five-minute timestamp tolerance applies, measured against the injected
//! clock.

use serde::Deserialize;
use std::sync::Arc;
use stripe::{EventObject, Webhook, WebhookError};
use thiserror::Error;

use crate::clock::Clock;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Event types the reconciliation pipeline acts on. Everything else is
/// acknowledged and ignored.
const TRACKED_EVENT_TYPES: &[&str] = &[
    "payment_intent.succeeded",
    "payment_intent.payment_failed",
    "charge.refunded",
    "charge.dispute.created",
    "charge.dispute.closed",
    "payout.created",
    "payout.updated",
    "payout.paid",
    "payout.failed",
    "payout.canceled",
    "payout.reconciliation_completed",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Platform,
    Connect,
}

/// Why a delivery was rejected. Logged, never returned to the caller.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("timestamp outside tolerance ({age_secs}s old)")]
    TimestampOutsideTolerance { age_secs: i64 },
    #[error("no signature matched any configured secret")]
    NoMatchingSignature,
    #[error("payload is not UTF-8")]
    NotUtf8,
    #[error("signed payload is not a valid event: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// A tracked event whose object could not be turned into a `StripeEvent`.
#[derive(Debug, Error)]
#[error("{event_type}: {reason}")]
pub struct UnprocessableEvent {
    pub event_type: String,
    pub reason: String,
}

/// Envelope fields read straight from the payload. The typed
/// `stripe::EventType` has no variant for some types this service handles,
/// and the envelope must stay readable when the typed decode fails.
#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    account: Option<String>,
}

#[derive(Debug)]
pub struct VerifiedEvent {
    pub id: String,
    pub event_type: String,
    /// Connected account the event originated from, absent for platform events.
    pub account: Option<String>,
    pub secret: SecretKind,
    /// The decoded event, or why the signed payload did not decode.
    pub event: Result<Box<stripe::Event>, String>,
}

pub struct WebhookVerifier {
    secrets: Vec<(SecretKind, String)>,
    clock: Arc<dyn Clock>,
}

impl WebhookVerifier {
    pub fn new(platform_secret: String, connect_secret: Option<String>, clock: Arc<dyn Clock>) -> Self {
        let mut secrets = vec![(SecretKind::Platform, platform_secret)];
        if let Some(connect) = connect_secret.filter(|s| !s.is_empty()) {
            secrets.push((SecretKind::Connect, connect));
        }
        Self { secrets, clock }
    }

    /// Check `payload` against the platform secret, then the connect secret.
    pub fn verify(&self, payload: &[u8], header: &str) -> Result<VerifiedEvent, VerificationError> {
        let body = std::str::from_utf8(payload).map_err(|_| VerificationError::NotUtf8)?;
        let now = self.clock.now().timestamp();

        for (kind, secret) in &self.secrets {
            let event = match Webhook::construct_event_with_timestamp(body, header, secret, now) {
                Ok(event) => Ok(Box::new(event)),
                // Signature and timestamp checked out; only the typed decode failed.
                Err(WebhookError::BadParse(e)) => Err(e.to_string()),
                Err(WebhookError::BadSignature | WebhookError::BadKey) => continue,
                Err(WebhookError::BadTimestamp(signed_at)) => {
                    return Err(VerificationError::TimestampOutsideTolerance {
                        age_secs: now - signed_at,
                    })
                }
                Err(WebhookError::BadHeader(_)) => return Err(VerificationError::MalformedHeader),
            };

            let envelope: Envelope = serde_json::from_str(body)?;
            return Ok(VerifiedEvent {
                id: envelope.id,
                event_type: envelope.event_type,
                account: envelope.account,
                secret: *kind,
                event,
            });
        }

        Err(VerificationError::NoMatchingSignature)
    }
}

/// Build a `stripe-signature` header value for `payload`.
#[cfg(any(test, feature = "test-utils"))]
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    use hmac::{Hmac, Mac};

    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

// ── Projections of the Stripe objects the pipeline reads ─────────────────────

#[derive(Debug, Clone)]
pub struct PaymentIntentObject {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub customer: Option<String>,
    pub payment_method: Option<String>,
    pub failure_message: Option<String>,
}

impl From<&stripe::PaymentIntent> for PaymentIntentObject {
    fn from(intent: &stripe::PaymentIntent) -> Self {
        Self {
            id: intent.id.to_string(),
            amount: intent.amount,
            currency: intent.currency.to_string(),
            customer: intent.customer.as_ref().map(|c| c.id().to_string()),
            payment_method: intent.payment_method.as_ref().map(|m| m.id().to_string()),
            failure_message: intent
                .last_payment_error
                .as_ref()
                .and_then(|e| e.message.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChargeObject {
    pub id: String,
    pub amount: i64,
    pub amount_refunded: i64,
    pub refunded: bool,
    pub payment_intent: Option<String>,
}

impl From<&stripe::Charge> for ChargeObject {
    fn from(charge: &stripe::Charge) -> Self {
        Self {
            id: charge.id.to_string(),
            amount: charge.amount,
            amount_refunded: charge.amount_refunded,
            refunded: charge.refunded,
            payment_intent: charge.payment_intent.as_ref().map(|pi| pi.id().to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DisputeObject {
    pub id: String,
    pub amount: i64,
    pub reason: String,
    pub status: String,
    pub payment_intent: Option<String>,
}

impl From<&stripe::Dispute> for DisputeObject {
    fn from(dispute: &stripe::Dispute) -> Self {
        Self {
            id: dispute.id.to_string(),
            amount: dispute.amount,
            reason: dispute.reason.clone(),
            status: dispute.status.as_str().to_string(),
            payment_intent: dispute.payment_intent.as_ref().map(|pi| pi.id().to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayoutObject {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    /// Unix seconds.
    pub arrival_date: i64,
}

impl From<&stripe::Payout> for PayoutObject {
    fn from(payout: &stripe::Payout) -> Self {
        Self {
            id: payout.id.to_string(),
            amount: payout.amount,
            currency: payout.currency.to_string(),
            status: payout.status.clone(),
            arrival_date: payout.arrival_date,
        }
    }
}

impl PayoutObject {
    pub fn arrival(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.arrival_date, 0)
    }
}

/// Events the reconciliation pipeline acts on.
#[derive(Debug, Clone)]
pub enum StripeEvent {
    PaymentSucceeded(PaymentIntentObject),
    PaymentFailed(PaymentIntentObject),
    ChargeRefunded(ChargeObject),
    DisputeCreated(DisputeObject),
    DisputeClosed(DisputeObject),
    PayoutChanged(PayoutObject),
    PayoutReconciled(PayoutObject),
    Unrecognized,
}

impl VerifiedEvent {
    pub fn classify(&self) -> Result<StripeEvent, UnprocessableEvent> {
        let event_type = self.event_type.as_str();
        if !TRACKED_EVENT_TYPES.contains(&event_type) {
            return Ok(StripeEvent::Unrecognized);
        }

        let unprocessable = |reason: String| UnprocessableEvent {
            event_type: self.event_type.clone(),
            reason,
        };
        let event = self.event.as_ref().map_err(|e| unprocessable(e.clone()))?;

        Ok(match (event_type, &event.data.object) {
            ("payment_intent.succeeded", EventObject::PaymentIntent(intent)) => {
                StripeEvent::PaymentSucceeded(intent.into())
            }
            ("payment_intent.payment_failed", EventObject::PaymentIntent(intent)) => {
                StripeEvent::PaymentFailed(intent.into())
            }
            ("charge.refunded", EventObject::Charge(charge)) => StripeEvent::ChargeRefunded(charge.into()),
            ("charge.dispute.created", EventObject::Dispute(dispute)) => {
                StripeEvent::DisputeCreated(dispute.into())
            }
            ("charge.dispute.closed", EventObject::Dispute(dispute)) => {
                StripeEvent::DisputeClosed(dispute.into())
            }
            ("payout.reconciliation_completed", EventObject::Payout(payout)) => {
                StripeEvent::PayoutReconciled(payout.into())
            }
            (_, EventObject::Payout(payout)) if event_type.starts_with("payout.") => {
                StripeEvent::PayoutChanged(payout.into())
            }
            _ => return Err(unprocessable("unexpected object for event type".to_string())),
        })
    }
}
