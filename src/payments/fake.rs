//! In-memory payment gateway for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::{
    domain::PaymentMethodType,
    error::{AppError, Result},
    payments::{CreatedIntent, CustomerDetails, IntentRequest, LookupError, PaymentGateway},
};

#[derive(Default)]
struct FakeState {
    customers: HashMap<(String, String), String>,
    customer_updates: Vec<(String, CustomerDetails)>,
    /// Keyed by Stripe idempotency key, like the real API.
    intents_by_key: HashMap<String, (String, CreatedIntent)>,
    intent_requests: Vec<IntentRequest>,
    payment_methods: HashMap<String, PaymentMethodType>,
    payout_fees: HashMap<String, i64>,
    fail_intents: bool,
    fail_method_lookups: bool,
    next_id: u64,
}

#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_customer(&self, account_id: &str, email: &str, customer_id: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .customers
            .insert((account_id.to_string(), email.to_string()), customer_id.to_string());
    }

    pub fn add_payment_method(&self, payment_method_id: &str, kind: PaymentMethodType) {
        let mut state = self.state.lock().unwrap();
        state.payment_methods.insert(payment_method_id.to_string(), kind);
    }

    pub fn set_payout_fees(&self, payout_id: &str, fees_cents: i64) {
        let mut state = self.state.lock().unwrap();
        state.payout_fees.insert(payout_id.to_string(), fees_cents);
    }

    pub fn fail_intents(&self, fail: bool) {
        self.state.lock().unwrap().fail_intents = fail;
    }

    pub fn fail_method_lookups(&self, fail: bool) {
        self.state.lock().unwrap().fail_method_lookups = fail;
    }

    /// Distinct intents created (idempotent replays are not counted).
    pub fn intent_count(&self) -> usize {
        self.state.lock().unwrap().intents_by_key.len()
    }

    pub fn intent_requests(&self) -> Vec<IntentRequest> {
        self.state.lock().unwrap().intent_requests.clone()
    }

    pub fn customer_count(&self) -> usize {
        self.state.lock().unwrap().customers.len()
    }

    pub fn customer_updates(&self) -> Vec<(String, CustomerDetails)> {
        self.state.lock().unwrap().customer_updates.clone()
    }

    fn next_id(state: &mut FakeState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{}_fake{:06}", prefix, state.next_id)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn find_customer_by_email(&self, account_id: &str, email: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .customers
            .get(&(account_id.to_string(), email.to_string()))
            .cloned())
    }

    async fn create_customer(&self, account_id: &str, details: &CustomerDetails) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let key = (account_id.to_string(), details.email.clone());
        if let Some(existing) = state.customers.get(&key) {
            return Ok(existing.clone());
        }
        let id = Self::next_id(&mut state, "cus");
        state.customers.insert(key, id.clone());
        Ok(id)
    }

    async fn update_customer(
        &self,
        _account_id: &str,
        customer_id: &str,
        details: &CustomerDetails,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .customer_updates
            .push((customer_id.to_string(), details.clone()));
        Ok(())
    }

    async fn create_payment_intent(
        &self,
        account_id: &str,
        request: &IntentRequest,
    ) -> Result<CreatedIntent> {
        let mut state = self.state.lock().unwrap();
        if state.fail_intents {
            return Err(AppError::External("Stripe error: card_declined".to_string()));
        }
        state.intent_requests.push(request.clone());

        if let Some((_, intent)) = state.intents_by_key.get(&request.idempotency_key) {
            return Ok(intent.clone());
        }

        let id = Self::next_id(&mut state, "pi");
        let intent = CreatedIntent {
            client_secret: format!("{}_secret_test", id),
            id,
        };
        state.intents_by_key.insert(
            request.idempotency_key.clone(),
            (account_id.to_string(), intent.clone()),
        );
        Ok(intent)
    }

    async fn client_secret(&self, _account_id: &str, payment_intent_id: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        state
            .intents_by_key
            .values()
            .find(|(_, intent)| intent.id == payment_intent_id)
            .map(|(_, intent)| intent.client_secret.clone())
            .ok_or_else(|| AppError::External(format!("No such payment_intent: {}", payment_intent_id)))
    }

    async fn payment_method_type(
        &self,
        _account_id: Option<&str>,
        payment_method_id: &str,
    ) -> std::result::Result<PaymentMethodType, LookupError> {
        let state = self.state.lock().unwrap();
        if state.fail_method_lookups {
            return Err(LookupError::Provider("connection reset".to_string()));
        }
        state
            .payment_methods
            .get(payment_method_id)
            .copied()
            .ok_or_else(|| LookupError::NotFound(payment_method_id.to_string()))
    }

    async fn payout_fees(&self, _account_id: &str, payout_id: &str) -> Result<i64> {
        let state = self.state.lock().unwrap();
        state
            .payout_fees
            .get(payout_id)
            .copied()
            .ok_or_else(|| AppError::External(format!("No such payout: {}", payout_id)))
    }
}
