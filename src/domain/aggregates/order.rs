//! Orders and their status machine
//!
//! An order is immutable after checkout except for `status` and the
//! payment-linkage fields. Status moves through two tables:
//!
//! payment reconciliation (webhook-driven, idempotent):
//!
//! | current   | intent succeeded | intent failed/canceled |
//! |-----------|------------------|------------------------|
//! | pending   | paid             | failed                 |
//! | any other | no-op            | no-op                  |
//!
//! fulfillment (operator-driven): paid -> shipped -> completed, and
//! pending -> canceled. Everything else is rejected.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::value_objects::line_total;

use super::product::Product;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Completed,
    Canceled,
    Failed,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Terminal payment outcomes reported by the provider webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    Canceled,
}

impl OrderStatus {
    /// The reconciliation transition table. `None` means the event is
    /// a no-op for this state, which is what makes redelivery of the
    /// same webhook safe.
    pub fn on_payment_outcome(self, outcome: PaymentOutcome) -> Option<OrderStatus> {
        match (self, outcome) {
            (OrderStatus::Pending, PaymentOutcome::Succeeded) => Some(OrderStatus::Paid),
            (OrderStatus::Pending, PaymentOutcome::Failed | PaymentOutcome::Canceled) => {
                Some(OrderStatus::Failed)
            }
            _ => None,
        }
    }

    /// Whether an operator (or a customer cancel) may move the order
    /// from `self` to `next`.
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Canceled)
                | (OrderStatus::Paid, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Completed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_intent_id: Option<String>,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A fresh pending order with a zero total; checkout fixes the
    /// total once every item snapshot is priced.
    pub fn pending(user_id: Uuid, currency: impl Into<String>, payment_intent_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            status: OrderStatus::Pending,
            total_amount: Decimal::ZERO,
            currency: currency.into(),
            payment_intent_id,
            payment_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Checkout-time snapshot of one purchased line. Decoupled from the
/// live product: later price or title edits must not change it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Option<Uuid>,
    pub vendor_id: Option<Uuid>,
    pub title_snapshot: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl OrderItem {
    /// `unit_price` must already be rounded to 2 places.
    pub fn snapshot(order_id: Uuid, product: &Product, unit_price: Decimal, quantity: i32) -> Self {
        Self {
            id: Uuid::now_v7(),
            order_id,
            product_id: Some(product.id),
            vendor_id: Some(product.vendor_id),
            title_snapshot: product.title.clone(),
            unit_price,
            quantity,
        }
    }

    pub fn subtotal(&self) -> Decimal {
        line_total(self.unit_price, self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn pending_moves_to_paid_on_success() {
        assert_eq!(
            OrderStatus::Pending.on_payment_outcome(PaymentOutcome::Succeeded),
            Some(OrderStatus::Paid)
        );
    }

    #[test]
    fn pending_moves_to_failed_on_failure_or_cancel() {
        assert_eq!(
            OrderStatus::Pending.on_payment_outcome(PaymentOutcome::Failed),
            Some(OrderStatus::Failed)
        );
        assert_eq!(
            OrderStatus::Pending.on_payment_outcome(PaymentOutcome::Canceled),
            Some(OrderStatus::Failed)
        );
    }

    #[test]
    fn terminal_states_ignore_payment_events() {
        for state in [
            OrderStatus::Paid,
            OrderStatus::Shipped,
            OrderStatus::Completed,
            OrderStatus::Canceled,
            OrderStatus::Failed,
        ] {
            assert_eq!(state.on_payment_outcome(PaymentOutcome::Succeeded), None);
            assert_eq!(state.on_payment_outcome(PaymentOutcome::Failed), None);
        }
    }

    #[test]
    fn fulfillment_path_is_linear() {
        assert!(OrderStatus::Paid.can_advance_to(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_advance_to(OrderStatus::Completed));
        assert!(OrderStatus::Pending.can_advance_to(OrderStatus::Canceled));
        assert!(!OrderStatus::Pending.can_advance_to(OrderStatus::Shipped));
        assert!(!OrderStatus::Paid.can_advance_to(OrderStatus::Completed));
        assert!(!OrderStatus::Failed.can_advance_to(OrderStatus::Canceled));
    }

    #[test]
    fn item_snapshot_keeps_its_own_price() {
        let vendor = Uuid::now_v7();
        let mut product = Product::new(vendor, "Trail Mid", dec!(29.99), 5);
        let order = Order::pending(Uuid::now_v7(), "USD", None);
        let item = OrderItem::snapshot(order.id, &product, dec!(29.99), 2);

        product.price = dec!(39.99);
        product.title = "Trail Mid v2".into();

        assert_eq!(item.unit_price, dec!(29.99));
        assert_eq!(item.title_snapshot, "Trail Mid");
        assert_eq!(item.subtotal(), dec!(59.98));
        assert_eq!(item.vendor_id, Some(vendor));
    }
}
