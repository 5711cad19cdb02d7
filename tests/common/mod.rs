#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use offertory::{
    api,
    clock::FixedClock,
    domain::{Church, DonationType, StripeConnectAccount, SubscriptionStatus},
    payments::{fake::FakeGateway, fees::FeeSchedule, webhook::signature_header, WebhookVerifier},
    repository::{ChurchRepository, DonationTypeRepository, NewChurch, NewConnectAccount},
    service::ServiceContext,
};
use serde_json::{json, Value};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub use offertory::payments::fixtures::{event, payment_intent};

pub const PLATFORM_SECRET: &str = "whsec_platform_test";
pub const CONNECT_SECRET: &str = "whsec_connect_test";
pub const ACCOUNT_ID: &str = "acct_1TestChurch";

pub fn start_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// A single, never-recycled connection keeps the in-memory database alive
/// for the whole test.
pub async fn setup_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    pool
}

pub struct TestApp {
    pub pool: SqlitePool,
    pub gateway: Arc<FakeGateway>,
    pub clock: Arc<FixedClock>,
    pub ctx: Arc<ServiceContext>,
    pub router: Router,
    pub church: Church,
    pub account: StripeConnectAccount,
    pub donation_type: DonationType,
}

/// App wired to a fake gateway, with one onboarded church ready to take gifts.
pub async fn spawn_app() -> TestApp {
    let pool = setup_pool().await;
    let gateway = Arc::new(FakeGateway::new());
    let clock = Arc::new(FixedClock::new(start_time()));

    let ctx = Arc::new(ServiceContext::new(
        pool.clone(),
        gateway.clone(),
        clock.clone(),
        FeeSchedule::default(),
        chrono::Duration::hours(72),
    ));

    let verifier = Arc::new(WebhookVerifier::new(
        PLATFORM_SECRET.to_string(),
        Some(CONNECT_SECRET.to_string()),
        clock.clone(),
    ));

    let router = api::create_app(ctx.clone(), verifier);

    let church = ctx
        .church_repo
        .create(NewChurch {
            name: "First Church".to_string(),
            onboarding_completed: true,
            subscription_status: SubscriptionStatus::Active,
        })
        .await
        .unwrap();
    let account = ctx
        .church_repo
        .create_connect_account(NewConnectAccount {
            church_id: church.id,
            stripe_account_id: ACCOUNT_ID.to_string(),
            charges_enabled: true,
            payouts_enabled: true,
            details_submitted: true,
        })
        .await
        .unwrap();
    let donation_type = ctx
        .donation_type_repo
        .create(church.id, "General Fund")
        .await
        .unwrap();

    TestApp {
        pool,
        gateway,
        clock,
        ctx,
        router,
        church,
        account,
        donation_type,
    }
}

pub fn donation_body(app: &TestApp, key: &str, base_amount: i64, cover_fees: bool) -> Value {
    json!({
        "idempotencyKey": key,
        "churchId": app.church.id,
        "donationTypeId": app.donation_type.id,
        "baseAmount": base_amount,
        "currency": "usd",
        "email": "Donor@Example.org",
        "firstName": "Ada",
        "lastName": "Lovelace",
        "addressLine1": "12 Chapel Rd",
        "city": "Springfield",
        "state": "IL",
        "postalCode": "62701",
        "country": "US",
        "isAnonymous": false,
        "coverFees": cover_fees,
        "donorLanguage": "en"
    })
}

pub async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
    };
    (status, body)
}

pub async fn post_json(router: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();
    read_json(router.clone().oneshot(request).await.unwrap()).await
}

/// POST a raw webhook body with an optional signature header.
pub async fn post_webhook_raw(
    router: &Router,
    payload: Vec<u8>,
    signature: Option<String>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    let request = builder.body(Body::from(payload)).unwrap();
    read_json(router.clone().oneshot(request).await.unwrap()).await
}

/// Deliver an event signed with `secret` at the app clock's current time.
pub async fn deliver(app: &TestApp, event: &Value, secret: &str) -> (StatusCode, Value) {
    use offertory::clock::Clock;

    let payload = serde_json::to_vec(event).unwrap();
    let header = signature_header(secret, app.clock.now().timestamp(), &payload);
    post_webhook_raw(&app.router, payload, Some(header)).await
}

pub struct Row {
    pub status: String,
    pub payment_method_type: Option<String>,
    pub refunded_amount_cents: i64,
    pub dispute_status: Option<String>,
    pub failure_message: Option<String>,
}

pub async fn transaction_row(pool: &SqlitePool, id: Uuid) -> Row {
    let (status, payment_method_type, refunded_amount_cents, dispute_status, failure_message): (
        String,
        Option<String>,
        i64,
        Option<String>,
        Option<String>,
    ) = sqlx::query_as(
        r#"
        SELECT status, payment_method_type, refunded_amount_cents, dispute_status, failure_message
        FROM donation_transactions WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_one(pool)
    .await
    .unwrap();

    Row {
        status,
        payment_method_type,
        refunded_amount_cents,
        dispute_status,
        failure_message,
    }
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Initiate a donation through the API and return (transaction id, intent id).
pub async fn initiate(app: &TestApp, key: &str, base_amount: i64, cover_fees: bool) -> (Uuid, String) {
    let (status, body) = post_json(
        &app.router,
        "/api/donations",
        &donation_body(app, key, base_amount, cover_fees),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "initiation failed: {body}");

    let transaction_id: Uuid = body["transactionId"].as_str().unwrap().parse().unwrap();
    let client_secret = body["clientSecret"].as_str().unwrap();
    let intent_id = client_secret.trim_end_matches("_secret_test").to_string();
    (transaction_id, intent_id)
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    read_json(router.clone().oneshot(request).await.unwrap()).await
}
