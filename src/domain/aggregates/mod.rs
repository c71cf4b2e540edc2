//! Aggregates module
pub mod cart;
pub mod order;
pub mod product;

pub use cart::{cart_total, CartEntry, CartLine};
pub use order::{Order, OrderItem, OrderStatus, PaymentOutcome};
pub use product::Product;
