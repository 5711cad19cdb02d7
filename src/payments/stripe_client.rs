use async_trait::async_trait;
use futures_util::TryStreamExt;
use stripe::{
    AccountId, Address, BalanceTransaction, Client, CreateCustomer, CreatePaymentIntent,
    Customer, CustomerId, ListBalanceTransactions, ListCustomers, PaymentIntent, PaymentIntentId,
    PaymentMethodId, PayoutId, RequestStrategy, UpdateCustomer,
};

use crate::{
    domain::{Currency, PaymentMethodType, PostalAddress},
    error::{AppError, Result},
    payments::{CreatedIntent, CustomerDetails, IntentRequest, LookupError, PaymentGateway},
};

/// Live gateway backed by the Stripe API.
pub struct StripeGateway {
    client: Client,
}

impl StripeGateway {
    pub fn new(secret_key: String) -> Self {
        Self {
            client: Client::new(secret_key),
        }
    }

    /// Client acting on behalf of a connected account.
    fn for_account(&self, account_id: &str) -> Result<Client> {
        let account: AccountId = account_id.parse().map_err(|_| {
            AppError::Internal(format!("Invalid connected account id: {}", account_id))
        })?;
        Ok(self.client.clone().with_stripe_account(account))
    }

    fn stripe_currency(currency: Currency) -> stripe::Currency {
        match currency {
            Currency::Usd => stripe::Currency::USD,
            Currency::Cad => stripe::Currency::CAD,
            Currency::Eur => stripe::Currency::EUR,
            Currency::Gbp => stripe::Currency::GBP,
            Currency::Aud => stripe::Currency::AUD,
        }
    }

    fn stripe_address(address: &PostalAddress) -> Option<Address> {
        if address.is_empty() {
            return None;
        }
        Some(Address {
            city: address.city.clone(),
            country: address.country.clone(),
            line1: address.line1.clone(),
            line2: address.line2.clone(),
            postal_code: address.postal_code.clone(),
            state: address.state.clone(),
        })
    }

    /// Largest page Stripe serves; later pages follow `has_more`.
    fn payout_transactions(payout_id: &str) -> Result<ListBalanceTransactions<'static>> {
        let payout: PayoutId = payout_id
            .parse()
            .map_err(|_| AppError::Internal(format!("Invalid payout id: {}", payout_id)))?;

        let mut params = ListBalanceTransactions::new();
        params.payout = Some(payout);
        params.limit = Some(100);
        Ok(params)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn find_customer_by_email(&self, account_id: &str, email: &str) -> Result<Option<String>> {
        let client = self.for_account(account_id)?;
        let mut params = ListCustomers::new();
        params.email = Some(email);
        params.limit = Some(1);

        let customers = Customer::list(&client, &params).await?;
        Ok(customers.data.into_iter().next().map(|c| c.id.to_string()))
    }

    async fn create_customer(&self, account_id: &str, details: &CustomerDetails) -> Result<String> {
        // Racing first-time gifts from one donor converge on one customer.
        let client = self.for_account(account_id)?.with_strategy(RequestStrategy::Idempotent(
            format!("donor-customer:{}:{}", account_id, details.email),
        ));
        let mut params = CreateCustomer::new();
        params.email = Some(&details.email);
        params.name = Some(&details.name);
        params.phone = details.phone.as_deref();
        params.address = Self::stripe_address(&details.address);

        let customer = Customer::create(&client, params).await?;
        tracing::debug!(customer = %customer.id, "Created Stripe customer");
        Ok(customer.id.to_string())
    }

    async fn update_customer(
        &self,
        account_id: &str,
        customer_id: &str,
        details: &CustomerDetails,
    ) -> Result<()> {
        let client = self.for_account(account_id)?;
        let id: CustomerId = customer_id
            .parse()
            .map_err(|_| AppError::Internal(format!("Invalid customer id: {}", customer_id)))?;

        let mut params = UpdateCustomer::new();
        params.name = Some(&details.name);
        params.phone = details.phone.as_deref();
        params.address = Self::stripe_address(&details.address);

        Customer::update(&client, &id, params).await?;
        Ok(())
    }

    async fn create_payment_intent(
        &self,
        account_id: &str,
        request: &IntentRequest,
    ) -> Result<CreatedIntent> {
        let client = self
            .for_account(account_id)?
            .with_strategy(RequestStrategy::Idempotent(request.idempotency_key.clone()));
        let customer: CustomerId = request.customer_id.parse().map_err(|_| {
            AppError::Internal(format!("Invalid customer id: {}", request.customer_id))
        })?;

        let mut params = CreatePaymentIntent::new(
            request.amount_cents,
            Self::stripe_currency(request.currency),
        );
        params.customer = Some(customer);
        params.application_fee_amount = Some(request.application_fee_cents);
        params.payment_method_types =
            Some(request.payment_method_types.iter().map(|t| t.to_string()).collect());
        params.receipt_email = Some(&request.receipt_email);
        params.description = Some(&request.description);
        params.metadata = Some(request.metadata.clone());

        let intent = PaymentIntent::create(&client, params).await?;
        let client_secret = intent
            .client_secret
            .ok_or_else(|| AppError::External("No client secret returned".to_string()))?;

        Ok(CreatedIntent {
            id: intent.id.to_string(),
            client_secret,
        })
    }

    async fn client_secret(&self, account_id: &str, payment_intent_id: &str) -> Result<String> {
        let client = self.for_account(account_id)?;
        let id: PaymentIntentId = payment_intent_id.parse().map_err(|_| {
            AppError::Internal(format!("Invalid payment intent id: {}", payment_intent_id))
        })?;

        let intent = PaymentIntent::retrieve(&client, &id, &[]).await?;
        intent
            .client_secret
            .ok_or_else(|| AppError::External("No client secret returned".to_string()))
    }

    async fn payment_method_type(
        &self,
        account_id: Option<&str>,
        payment_method_id: &str,
    ) -> std::result::Result<PaymentMethodType, LookupError> {
        let client = match account_id {
            Some(account) => self
                .for_account(account)
                .map_err(|e| LookupError::Provider(e.to_string()))?,
            None => self.client.clone(),
        };
        let id: PaymentMethodId = payment_method_id
            .parse()
            .map_err(|_| LookupError::NotFound(payment_method_id.to_string()))?;

        let method = stripe::PaymentMethod::retrieve(&client, &id, &[])
            .await
            .map_err(|e| LookupError::Provider(e.to_string()))?;

        Ok(PaymentMethodType::from_stripe(method.type_.as_str()))
    }

    async fn payout_fees(&self, account_id: &str, payout_id: &str) -> Result<i64> {
        let client = self.for_account(account_id)?;
        let params = Self::payout_transactions(payout_id)?;

        let first_page = BalanceTransaction::list(&client, &params).await?;
        let total = first_page
            .paginate(params)
            .stream(&client)
            .try_fold(0i64, |sum, txn| async move { Ok(sum + txn.fee) })
            .await?;

        Ok(total)
    }
}
