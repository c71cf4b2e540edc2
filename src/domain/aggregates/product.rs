//! Product record
//!
//! `stock` is the single contended mutable resource in the system. It
//! is decremented only inside the checkout transaction, behind a row
//! lock plus a guarded conditional update.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub title: String,
    pub price: Decimal,
    pub stock: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(vendor_id: Uuid, title: impl Into<String>, price: Decimal, stock: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            vendor_id,
            title: title.into(),
            price,
            stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_stock_for(&self, quantity: i32) -> bool {
        quantity > 0 && self.stock >= quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stock_check_rejects_non_positive_quantities() {
        let p = Product::new(Uuid::now_v7(), "Court Low", dec!(89.99), 10);
        assert!(p.has_stock_for(10));
        assert!(!p.has_stock_for(11));
        assert!(!p.has_stock_for(0));
        assert!(!p.has_stock_for(-1));
    }
}
