mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::*;
use offertory::{
    clock::Clock,
    domain::{PaymentMethodType, PayoutStatus},
    payments::{fixtures, webhook::signature_header},
    repository::{webhook_event_repository, DonationRepository, PayoutRepository},
};
use serde_json::{json, Value};
use sqlx::SqlitePool;

async fn donor_totals(pool: &SqlitePool) -> (i64, Option<String>, bool) {
    let (total, customer, last): (i64, Option<String>, Option<chrono::NaiveDateTime>) =
        sqlx::query_as("SELECT total_given_cents, stripe_customer_id, last_donation_at FROM donors")
            .fetch_one(pool)
            .await
            .unwrap();
    (total, customer, last.is_some())
}

fn succeeded(event_id: &str, intent_id: &str, amount: i64, method: Option<&str>) -> Value {
    event(
        event_id,
        "payment_intent.succeeded",
        payment_intent(intent_id, amount, method),
        Some(ACCOUNT_ID),
    )
}

fn charge(intent_id: &str, amount: i64, refunded_cents: i64) -> Value {
    fixtures::charge("ch_test_1", intent_id, amount, refunded_cents)
}

fn dispute(intent_id: &str, status: &str) -> Value {
    fixtures::dispute("dp_test_1", intent_id, 10_000, status)
}

fn payout(status: &str) -> Value {
    fixtures::payout("po_test_1", 98_500, status)
}

// ── Signature handling ──────────────────────────────────────────────────────

#[tokio::test]
async fn signature_matching_neither_secret_is_rejected_generically() {
    let app = spawn_app().await;
    let payload = serde_json::to_vec(&succeeded("evt_bad_sig", "pi_x", 100, None)).unwrap();
    let header = signature_header("whsec_attacker", app.clock.now().timestamp(), &payload);

    let (status, body) = post_webhook_raw(&app.router, payload, Some(header)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Signature verification failed." }));
    assert_eq!(count(&app.pool, "webhook_events").await, 0);
}

#[tokio::test]
async fn connect_secret_is_accepted() {
    let app = spawn_app().await;
    let (status, body) = deliver(
        &app,
        &event("evt_connect_1", "customer.created", json!({ "id": "cus_1" }), Some(ACCOUNT_ID)),
        CONNECT_SECRET,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
}

#[tokio::test]
async fn stale_timestamp_is_rejected() {
    let app = spawn_app().await;
    let payload = serde_json::to_vec(&event("evt_stale", "customer.created", json!({}), None)).unwrap();
    let old = app.clock.now() - Duration::minutes(10);
    let header = signature_header(PLATFORM_SECRET, old.timestamp(), &payload);

    let (status, body) = post_webhook_raw(&app.router, payload, Some(header)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Signature verification failed.");
}

#[tokio::test]
async fn empty_body_and_missing_header_are_rejected_before_verification() {
    let app = spawn_app().await;

    let (status, body) = post_webhook_raw(&app.router, Vec::new(), Some("t=1,v1=00".into())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Empty request body.");

    let payload = serde_json::to_vec(&event("evt_nohdr", "customer.created", json!({}), None)).unwrap();
    let (status, body) = post_webhook_raw(&app.router, payload, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing stripe-signature header.");
}

// ── Payment lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn succeeded_event_settles_transaction_and_donor() {
    let app = spawn_app().await;
    let (id, intent) = initiate(&app, "key-settle-001", 10_000, false).await;
    app.gateway
        .add_payment_method("pm_bank_1", PaymentMethodType::UsBankAccount);

    let (status, body) = deliver(&app, &succeeded("evt_ok_1", &intent, 10_000, Some("pm_bank_1")), CONNECT_SECRET).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    let row = transaction_row(&app.pool, id).await;
    assert_eq!(row.status, "succeeded");
    assert_eq!(row.payment_method_type.as_deref(), Some("us_bank_account"));

    let (total, customer, has_last) = donor_totals(&app.pool).await;
    assert_eq!(total, 10_000);
    assert_eq!(customer.as_deref(), Some("cus_fake000001"));
    assert!(has_last);

    let tx = app.ctx.donation_repo.find_by_id(id).await.unwrap().unwrap();
    assert!(tx.processed_at.is_some());
}

#[tokio::test]
async fn duplicate_delivery_is_flagged_and_not_reapplied() {
    let app = spawn_app().await;
    let (_, intent) = initiate(&app, "key-dup-00001", 10_000, false).await;
    let evt = succeeded("evt_dup_1", &intent, 10_000, None);

    let (_, first) = deliver(&app, &evt, PLATFORM_SECRET).await;
    let (status, second) = deliver(&app, &evt, PLATFORM_SECRET).await;

    assert_eq!(first, json!({ "received": true }));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second, json!({ "received": true, "duplicate": true }));
    assert_eq!(donor_totals(&app.pool).await.0, 10_000);
    assert_eq!(count(&app.pool, "webhook_events").await, 1);
}

#[tokio::test]
async fn redelivery_under_a_new_event_id_is_a_no_op() {
    let app = spawn_app().await;
    let (id, intent) = initiate(&app, "key-redeliver1", 10_000, false).await;

    deliver(&app, &succeeded("evt_first", &intent, 10_000, None), PLATFORM_SECRET).await;
    let (status, body) = deliver(&app, &succeeded("evt_second", &intent, 10_000, None), PLATFORM_SECRET).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    assert_eq!(transaction_row(&app.pool, id).await.status, "succeeded");
    assert_eq!(donor_totals(&app.pool).await.0, 10_000);
}

#[tokio::test]
async fn missing_transaction_is_acknowledged_without_writes() {
    let app = spawn_app().await;

    let (status, body) = deliver(&app, &succeeded("evt_orphan", "pi_unknown", 500, None), PLATFORM_SECRET).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true, "warning": "Transaction not found" }));
    assert_eq!(count(&app.pool, "webhook_events").await, 0);
    assert_eq!(count(&app.pool, "donation_transactions").await, 0);
}

#[tokio::test]
async fn failed_method_lookup_defaults_to_card() {
    let app = spawn_app().await;
    let (id, intent) = initiate(&app, "key-lookup-01", 2_000, false).await;
    app.gateway.fail_method_lookups(true);

    let (status, _) = deliver(&app, &succeeded("evt_lookup", &intent, 2_000, Some("pm_any")), CONNECT_SECRET).await;

    assert_eq!(status, StatusCode::OK);
    let row = transaction_row(&app.pool, id).await;
    assert_eq!(row.status, "succeeded");
    assert_eq!(row.payment_method_type.as_deref(), Some("card"));
}

#[tokio::test]
async fn payment_failed_records_message() {
    let app = spawn_app().await;
    let (id, intent) = initiate(&app, "key-failed-01", 2_000, false).await;
    let object = fixtures::declined_payment_intent(&intent, 2_000, "Your card was declined.");

    let (status, _) = deliver(
        &app,
        &event("evt_fail_1", "payment_intent.payment_failed", object, Some(ACCOUNT_ID)),
        CONNECT_SECRET,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let row = transaction_row(&app.pool, id).await;
    assert_eq!(row.status, "failed");
    assert_eq!(row.failure_message.as_deref(), Some("Your card was declined."));
    assert_eq!(donor_totals(&app.pool).await.0, 0);
}

#[tokio::test]
async fn disallowed_transition_is_recorded_as_anomaly() {
    let app = spawn_app().await;
    let (id, intent) = initiate(&app, "key-anomaly-1", 2_000, false).await;
    deliver(&app, &succeeded("evt_an_ok", &intent, 2_000, None), PLATFORM_SECRET).await;

    let (status, body) = deliver(
        &app,
        &event("evt_an_fail", "payment_intent.payment_failed", payment_intent(&intent, 2_000, None), None),
        PLATFORM_SECRET,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    assert_eq!(transaction_row(&app.pool, id).await.status, "succeeded");
    assert_eq!(count(&app.pool, "webhook_events").await, 2);
}

#[tokio::test]
async fn event_from_another_connected_account_changes_nothing() {
    let app = spawn_app().await;
    let (id, intent) = initiate(&app, "key-foreign-a", 2_000, false).await;

    let (status, _) = deliver(
        &app,
        &event("evt_foreign", "payment_intent.succeeded", payment_intent(&intent, 2_000, None), Some("acct_someone_else")),
        CONNECT_SECRET,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(transaction_row(&app.pool, id).await.status, "pending");
}

#[tokio::test]
async fn partial_then_full_refund() {
    let app = spawn_app().await;
    let (id, intent) = initiate(&app, "key-refund-01", 10_000, false).await;
    deliver(&app, &succeeded("evt_rf_ok", &intent, 10_000, None), CONNECT_SECRET).await;

    deliver(
        &app,
        &event("evt_rf_partial", "charge.refunded", charge(&intent, 10_000, 4_000), Some(ACCOUNT_ID)),
        CONNECT_SECRET,
    )
    .await;
    let row = transaction_row(&app.pool, id).await;
    assert_eq!(row.status, "succeeded");
    assert_eq!(row.refunded_amount_cents, 4_000);
    assert_eq!(donor_totals(&app.pool).await.0, 6_000);

    deliver(
        &app,
        &event("evt_rf_full", "charge.refunded", charge(&intent, 10_000, 10_000), Some(ACCOUNT_ID)),
        CONNECT_SECRET,
    )
    .await;
    let row = transaction_row(&app.pool, id).await;
    assert_eq!(row.status, "refunded");
    assert_eq!(row.refunded_amount_cents, 10_000);
    assert_eq!(donor_totals(&app.pool).await.0, 0);
}

#[tokio::test]
async fn covered_gift_credits_the_intended_amount() {
    let app = spawn_app().await;
    let (_, intent) = initiate(&app, "key-covered-01", 10_000, true).await;
    let charged = app.gateway.intent_requests()[0].amount_cents;
    assert_eq!(charged, 10_437);

    deliver(&app, &succeeded("evt_cv_ok", &intent, charged, None), CONNECT_SECRET).await;
    assert_eq!(donor_totals(&app.pool).await.0, 10_000);

    deliver(
        &app,
        &event("evt_cv_part", "charge.refunded", charge(&intent, charged, 5_000), Some(ACCOUNT_ID)),
        CONNECT_SECRET,
    )
    .await;
    assert_eq!(donor_totals(&app.pool).await.0, 5_000);

    deliver(
        &app,
        &event("evt_cv_full", "charge.refunded", charge(&intent, charged, charged), Some(ACCOUNT_ID)),
        CONNECT_SECRET,
    )
    .await;
    assert_eq!(donor_totals(&app.pool).await.0, 0);
}

#[tokio::test]
async fn refunding_a_covered_fee_leaves_other_gifts_credited() {
    let app = spawn_app().await;
    let (_, first) = initiate(&app, "key-covered-02", 10_000, true).await;
    let (_, second) = initiate(&app, "key-covered-03", 2_000, false).await;
    let charged = app.gateway.intent_requests()[0].amount_cents;

    deliver(&app, &succeeded("evt_cv2_a", &first, charged, None), CONNECT_SECRET).await;
    deliver(&app, &succeeded("evt_cv2_b", &second, 2_000, None), CONNECT_SECRET).await;
    assert_eq!(donor_totals(&app.pool).await.0, 12_000);

    deliver(
        &app,
        &event("evt_cv2_rf", "charge.refunded", charge(&first, charged, charged), Some(ACCOUNT_ID)),
        CONNECT_SECRET,
    )
    .await;
    assert_eq!(donor_totals(&app.pool).await.0, 2_000);
}

#[tokio::test]
async fn refund_on_pending_transaction_is_ignored() {
    let app = spawn_app().await;
    let (id, intent) = initiate(&app, "key-refund-02", 10_000, false).await;

    let (status, _) = deliver(
        &app,
        &event("evt_rf_early", "charge.refunded", charge(&intent, 10_000, 10_000), Some(ACCOUNT_ID)),
        CONNECT_SECRET,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let row = transaction_row(&app.pool, id).await;
    assert_eq!(row.status, "pending");
    assert_eq!(row.refunded_amount_cents, 0);
}

#[tokio::test]
async fn dispute_opens_and_closes() {
    let app = spawn_app().await;
    let (id, intent) = initiate(&app, "key-dispute-1", 10_000, false).await;
    deliver(&app, &succeeded("evt_dp_ok", &intent, 10_000, None), CONNECT_SECRET).await;

    deliver(
        &app,
        &event("evt_dp_open", "charge.dispute.created", dispute(&intent, "needs_response"), Some(ACCOUNT_ID)),
        CONNECT_SECRET,
    )
    .await;
    let row = transaction_row(&app.pool, id).await;
    assert_eq!(row.status, "disputed");
    assert_eq!(row.dispute_status.as_deref(), Some("needs_response"));

    deliver(
        &app,
        &event("evt_dp_close", "charge.dispute.closed", dispute(&intent, "won"), Some(ACCOUNT_ID)),
        CONNECT_SECRET,
    )
    .await;
    let row = transaction_row(&app.pool, id).await;
    assert_eq!(row.status, "disputed");
    assert_eq!(row.dispute_status.as_deref(), Some("won"));
}

#[tokio::test]
async fn unrecognized_event_is_acknowledged() {
    let app = spawn_app().await;
    let (status, body) = deliver(
        &app,
        &event("evt_misc", "invoice.paid", json!({ "id": "in_1" }), None),
        PLATFORM_SECRET,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
}

#[tokio::test]
async fn undecodable_object_is_acknowledged_with_warning() {
    let app = spawn_app().await;
    let (status, body) = deliver(
        &app,
        &event("evt_garbled", "payment_intent.succeeded", json!({ "id": "pi_1" }), None),
        PLATFORM_SECRET,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["warning"], "Unprocessable event payload");
}

// ── Payouts ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn payout_events_upsert_and_reconcile_summary() {
    let app = spawn_app().await;

    deliver(&app, &event("evt_po_new", "payout.created", payout("pending"), Some(ACCOUNT_ID)), CONNECT_SECRET).await;
    deliver(&app, &event("evt_po_paid", "payout.paid", payout("paid"), Some(ACCOUNT_ID)), CONNECT_SECRET).await;

    let summary = app
        .ctx
        .payout_repo
        .find_by_payout_id("po_test_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.church_id, app.church.id);
    assert_eq!(summary.status, PayoutStatus::Paid);
    assert_eq!(summary.amount_cents, 98_500);
    assert!(!summary.is_reconciled());
    assert_eq!(summary.effective_fees(1_500), 1_500);

    app.gateway.set_payout_fees("po_test_1", 1_412);
    let (status, _) = deliver(
        &app,
        &event("evt_po_rec", "payout.reconciliation_completed", payout("paid"), Some(ACCOUNT_ID)),
        CONNECT_SECRET,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let summary = app
        .ctx
        .payout_repo
        .find_by_payout_id("po_test_1")
        .await
        .unwrap()
        .unwrap();
    assert!(summary.is_reconciled());
    assert_eq!(summary.effective_fees(1_500), 1_412);
    assert_eq!(count(&app.pool, "payout_summaries").await, 1);
}

#[tokio::test]
async fn reconciliation_fee_lookup_failure_is_retried() {
    let app = spawn_app().await;

    let (status, _) = deliver(
        &app,
        &event("evt_po_nofees", "payout.reconciliation_completed", payout("paid"), Some(ACCOUNT_ID)),
        CONNECT_SECRET,
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(count(&app.pool, "webhook_events").await, 0);
}

#[tokio::test]
async fn payout_from_unknown_account_is_not_stored() {
    let app = spawn_app().await;
    let (status, _) = deliver(
        &app,
        &event("evt_po_stranger", "payout.paid", payout("paid"), Some("acct_stranger")),
        CONNECT_SECRET,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(count(&app.pool, "payout_summaries").await, 0);
}

// ── Failure and retention ───────────────────────────────────────────────────

#[tokio::test]
async fn database_failure_returns_server_error() {
    let app = spawn_app().await;
    app.pool.close().await;

    let (status, body) = deliver(&app, &succeeded("evt_db_down", "pi_x", 100, None), PLATFORM_SECRET).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Database error occurred");
}

#[tokio::test]
async fn failure_inside_settlement_rolls_back_everything() {
    let app = spawn_app().await;
    let (id, intent) = initiate(&app, "key-rollback-1", 10_000, false).await;
    sqlx::query(
        "CREATE TRIGGER reject_gift BEFORE UPDATE ON donors BEGIN SELECT RAISE(ABORT, 'donor ledger offline'); END",
    )
    .execute(&app.pool)
    .await
    .unwrap();
    let evt = succeeded("evt_rollback", &intent, 10_000, None);

    let (status, body) = deliver(&app, &evt, PLATFORM_SECRET).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Database error occurred");
    let row = transaction_row(&app.pool, id).await;
    assert_eq!(row.status, "pending");
    assert_eq!(row.payment_method_type, None);
    assert_eq!(count(&app.pool, "webhook_events").await, 0);
    assert_eq!(donor_totals(&app.pool).await.0, 0);

    sqlx::query("DROP TRIGGER reject_gift")
        .execute(&app.pool)
        .await
        .unwrap();
    let (status, body) = deliver(&app, &evt, PLATFORM_SECRET).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    assert_eq!(transaction_row(&app.pool, id).await.status, "succeeded");
    assert_eq!(donor_totals(&app.pool).await.0, 10_000);
    assert_eq!(count(&app.pool, "webhook_events").await, 1);
}

#[tokio::test]
async fn expired_markers_are_purged_and_reclaimable() {
    let app = spawn_app().await;
    deliver(&app, &event("evt_old", "invoice.paid", json!({}), None), PLATFORM_SECRET).await;
    assert_eq!(count(&app.pool, "webhook_events").await, 1);

    let now = app.clock.now();
    assert!(webhook_event_repository::is_processed(&app.pool, "evt_old", now).await.unwrap());

    let later = now + Duration::hours(73);
    assert!(!webhook_event_repository::is_processed(&app.pool, "evt_old", later).await.unwrap());
    assert!(webhook_event_repository::claim(&app.pool, "evt_old", "invoice.paid", later, later + Duration::hours(72))
        .await
        .unwrap());
    assert!(!webhook_event_repository::claim(&app.pool, "evt_old", "invoice.paid", later, later + Duration::hours(72))
        .await
        .unwrap());

    let purged = webhook_event_repository::purge_expired(&app.pool, later + Duration::hours(73))
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert_eq!(count(&app.pool, "webhook_events").await, 0);
}
