//! Stripe webhook payloads shaped the way the API sends them, complete
//! enough for `stripe::Event` to decode.

use serde_json::{json, Value};

pub const CREATED: i64 = 1_700_000_000;

pub fn event(id: &str, event_type: &str, object: Value, account: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "event",
        "api_version": "2023-10-16",
        "type": event_type,
        "created": CREATED,
        "account": account,
        "livemode": false,
        "pending_webhooks": 1,
        "request": { "id": null, "idempotency_key": null },
        "data": { "object": object }
    })
}

pub fn payment_intent(id: &str, amount: i64, payment_method: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "payment_intent",
        "amount": amount,
        "amount_capturable": 0,
        "amount_received": amount,
        "capture_method": "automatic",
        "confirmation_method": "automatic",
        "created": CREATED,
        "currency": "usd",
        "customer": "cus_fake000001",
        "livemode": false,
        "metadata": {},
        "payment_method": payment_method,
        "payment_method_types": ["card", "us_bank_account"],
        "status": "succeeded",
        "last_payment_error": null
    })
}

/// `payment_intent.payment_failed` object carrying a card decline.
pub fn declined_payment_intent(id: &str, amount: i64, message: &str) -> Value {
    let mut intent = payment_intent(id, amount, None);
    intent["status"] = json!("requires_payment_method");
    intent["amount_received"] = json!(0);
    intent["last_payment_error"] = json!({
        "type": "card_error",
        "code": "card_declined",
        "message": message
    });
    intent
}

pub fn charge(id: &str, payment_intent: &str, amount: i64, amount_refunded: i64) -> Value {
    json!({
        "id": id,
        "object": "charge",
        "amount": amount,
        "amount_captured": amount,
        "amount_refunded": amount_refunded,
        "billing_details": {},
        "captured": true,
        "created": CREATED,
        "currency": "usd",
        "disputed": false,
        "livemode": false,
        "metadata": {},
        "paid": true,
        "payment_intent": payment_intent,
        "refunded": amount_refunded >= amount,
        "status": "succeeded"
    })
}

pub fn dispute(id: &str, payment_intent: &str, amount: i64, status: &str) -> Value {
    json!({
        "id": id,
        "object": "dispute",
        "amount": amount,
        "balance_transactions": [],
        "charge": "ch_disputed",
        "created": CREATED,
        "currency": "usd",
        "evidence": {},
        "evidence_details": { "has_evidence": false, "past_due": false, "submission_count": 0 },
        "is_charge_refundable": false,
        "livemode": false,
        "metadata": {},
        "payment_intent": payment_intent,
        "reason": "fraudulent",
        "status": status
    })
}

pub fn payout(id: &str, amount: i64, status: &str) -> Value {
    json!({
        "id": id,
        "object": "payout",
        "amount": amount,
        "arrival_date": CREATED + 86_400,
        "automatic": true,
        "created": CREATED,
        "currency": "usd",
        "livemode": false,
        "method": "standard",
        "reconciliation_status": if status == "paid" { "completed" } else { "not_applicable" },
        "source_type": "card",
        "status": status,
        "type": "bank_account"
    })
}
