//! Stride Commerce
//!
//! Order checkout and payment reconciliation core for a multi-vendor
//! storefront.
//!
//! ## Features
//! - Atomic checkout: ordered row locks, guarded stock decrement,
//!   price-snapshot order items, all-or-nothing commit
//! - Payment-intent quoting against the live cart
//! - Idempotent webhook reconciliation over an explicit status
//!   transition table
//! - Customer/vendor/admin order views and status advancement
//! - Pluggable storage (PostgreSQL, in-memory) and payment provider
//!   (Stripe, mock) ports

pub mod domain;
pub mod engine;
pub mod payments;
pub mod store;

pub use engine::{CheckoutEngine, CheckoutError, PaymentQuote, PlacedOrder, WebhookError, WebhookOutcome};
