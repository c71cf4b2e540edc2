//! Cart lines
//!
//! One cart per user, one line per (cart, product) pair. Lines are
//! live-priced: a subtotal is always quantity times the product's
//! current price, so nothing here snapshots money.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::{line_total, round_half_up};

use super::product::Product;

/// A single cart row as stored: which product, how many.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

impl CartLine {
    pub fn new(product_id: Uuid, quantity: i32) -> Self {
        Self { id: Uuid::now_v7(), product_id, quantity }
    }
}

/// A cart line joined with its live product, for views and quotes.
#[derive(Debug, Clone)]
pub struct CartEntry {
    pub line: CartLine,
    pub product: Product,
}

impl CartEntry {
    /// Quantity times the rounded live unit price.
    pub fn subtotal(&self) -> Decimal {
        line_total(round_half_up(self.product.price), self.line.quantity)
    }
}

/// Cart total computed the same way a payment quote is: each unit
/// price rounded before multiplication, the aggregate rounded once at
/// the end.
pub fn cart_total(entries: &[CartEntry]) -> Decimal {
    round_half_up(entries.iter().map(CartEntry::subtotal).sum())
}
