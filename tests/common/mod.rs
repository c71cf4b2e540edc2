//! Shared harness: in-memory store, mock provider, signed webhook
//! payload builders.
#![allow(dead_code)]

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use stride_commerce::domain::aggregates::Product;
use stride_commerce::payments::{webhook, MockPaymentProvider, PaymentProvider};
use stride_commerce::store::{CommerceStore, MemoryStore};
use stride_commerce::CheckoutEngine;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<MockPaymentProvider>,
    pub engine: Arc<CheckoutEngine>,
}

pub fn harness() -> Harness {
    harness_with(MockPaymentProvider::new())
}

pub fn harness_with(provider: MockPaymentProvider) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(provider);
    let engine = Arc::new(CheckoutEngine::new(
        store.clone() as Arc<dyn CommerceStore>,
        provider.clone() as Arc<dyn PaymentProvider>,
        Some(WEBHOOK_SECRET.to_string()),
        "USD",
    ));
    Harness { store, provider, engine }
}

pub async fn seed_product(store: &MemoryStore, title: &str, price: Decimal, stock: i32) -> Product {
    let product = Product::new(Uuid::now_v7(), title, price, stock);
    store.insert_product(&product).await.unwrap();
    product
}

pub async fn put_in_cart(store: &MemoryStore, user_id: Uuid, product: &Product, quantity: i32) {
    store.set_cart_item(user_id, product.id, quantity).await.unwrap();
}

/// Signs `payload` the way the provider would, valid right now.
pub fn sign(payload: &str) -> String {
    webhook::sign_payload(payload.as_bytes(), WEBHOOK_SECRET, chrono::Utc::now().timestamp())
}

pub fn succeeded_payload(intent_id: &str) -> String {
    serde_json::json!({
        "id": "evt_succeeded",
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": intent_id, "latest_charge": "ch_test"}}
    })
    .to_string()
}

pub fn failed_payload(intent_id: &str) -> String {
    serde_json::json!({
        "id": "evt_failed",
        "type": "payment_intent.payment_failed",
        "data": {"object": {"id": intent_id}}
    })
    .to_string()
}

pub fn canceled_payload(intent_id: &str) -> String {
    serde_json::json!({
        "id": "evt_canceled",
        "type": "payment_intent.canceled",
        "data": {"object": {"id": intent_id}}
    })
    .to_string()
}
