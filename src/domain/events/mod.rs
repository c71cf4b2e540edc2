//! Domain events
//!
//! Published to NATS as JSON after the corresponding state change has
//! committed. Best-effort: a failed publish is logged, never surfaced.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
        currency: String,
    },
    Paid {
        order_id: Uuid,
    },
    Failed {
        order_id: Uuid,
    },
    Canceled {
        order_id: Uuid,
    },
}

impl OrderEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            OrderEvent::Created { .. } => "orders.created",
            OrderEvent::Paid { .. } => "orders.paid",
            OrderEvent::Failed { .. } => "orders.failed",
            OrderEvent::Canceled { .. } => "orders.canceled",
        }
    }
}
