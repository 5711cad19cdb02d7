use std::sync::Arc;
use crate::{payments::WebhookVerifier, service::ServiceContext};

#[derive(Clone)]
pub struct AppState {
    pub service_context: Arc<ServiceContext>,
    pub verifier: Arc<WebhookVerifier>,
}

impl AppState {
    pub fn new(service_context: Arc<ServiceContext>, verifier: Arc<WebhookVerifier>) -> Self {
        Self {
            service_context,
            verifier,
        }
    }
}
