//! Payment provider boundary
//!
//! The engine talks to the provider through the `PaymentProvider`
//! port: mint an intent for an amount in minor units, get back the
//! provider's intent id and client secret. Webhook verification and
//! parsing live in [`webhook`]; the live adapter in [`stripe`].

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod mock;
pub mod stripe;
pub mod webhook;

pub use mock::MockPaymentProvider;
pub use stripe::StripeGateway;

/// What the engine asks the provider for: a charge authorization in
/// minor currency units, tagged with the buying user.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("payment provider rejected the request: {0}")]
    Provider(String),
    #[error("payment provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent, PaymentError>;
}
