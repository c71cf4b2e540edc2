//! Mock provider for tests and provider-less environments.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{IntentRequest, PaymentError, PaymentIntent, PaymentProvider};

#[derive(Default)]
pub struct MockPaymentProvider {
    fail_with: Option<String>,
    counter: AtomicU64,
    requests: Mutex<Vec<IntentRequest>>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that rejects every intent with the given message.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<IntentRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent, PaymentError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        if let Some(message) = &self.fail_with {
            return Err(PaymentError::Provider(message.clone()));
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(PaymentIntent {
            id: format!("pi_mock_{n}"),
            client_secret: format!("pi_mock_{n}_secret"),
        })
    }
}
