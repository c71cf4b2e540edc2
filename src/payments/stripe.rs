//! Stripe adapter
//!
//! Form-encoded POST to `/v1/payment_intents` with bearer auth, the
//! same call shape the dashboard-generated integrations use. Only the
//! fields the checkout flow needs are modeled.

use async_trait::async_trait;
use serde::Deserialize;

use super::{IntentRequest, PaymentError, PaymentIntent, PaymentProvider};

const STRIPE_API_BASE: &str = "https://api.stripe.com";

pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: secret_key.into(),
            base_url: STRIPE_API_BASE.to_string(),
        }
    }

    /// Point the adapter at a different host (stripe-mock, a proxy).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl PaymentProvider for StripeGateway {
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent, PaymentError> {
        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&[
                ("amount", request.amount_minor.to_string()),
                ("currency", request.currency.to_lowercase()),
                ("metadata[user_id]", request.user_id.to_string()),
                ("automatic_payment_methods[enabled]", "true".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let message = response
                .json::<ErrorResponse>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| "unknown provider error".to_string());
            return Err(PaymentError::Provider(message));
        }

        let intent: IntentResponse = response.json().await?;
        Ok(PaymentIntent {
            id: intent.id,
            client_secret: intent.client_secret,
        })
    }
}
