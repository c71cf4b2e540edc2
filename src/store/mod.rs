//! Storage ports
//!
//! `CommerceStore` covers plain reads and the cart's thin CRUD;
//! `StoreTx` is the unit of work the checkout engine and the webhook
//! reconciler run inside. Dropping a `StoreTx` without calling
//! `commit` discards every write it performed.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{CartEntry, CartLine, Order, OrderItem, OrderStatus, Product};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait StoreTx: Send {
    /// The caller's cart lines, product references only.
    async fn cart_lines(&mut self, user_id: Uuid) -> Result<Vec<CartLine>, StoreError>;

    /// Loads and exclusively locks the given products. `ids` must be
    /// sorted; locks are taken in that order so concurrent checkouts
    /// over overlapping carts cannot deadlock each other.
    async fn products_for_update(&mut self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError>;

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;

    /// Guarded decrement: `stock = stock - qty` only where
    /// `stock >= qty`. Returns whether a row matched.
    async fn reserve_stock(&mut self, product_id: Uuid, quantity: i32) -> Result<bool, StoreError>;

    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<(), StoreError>;

    async fn update_order_total(&mut self, order_id: Uuid, total: Decimal) -> Result<(), StoreError>;

    async fn clear_cart(&mut self, user_id: Uuid) -> Result<(), StoreError>;

    async fn order_by_intent(&mut self, intent_id: &str) -> Result<Option<Order>, StoreError>;

    async fn order_for_update(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Compare-and-set on status. Returns false when the row was no
    /// longer in `from`, which callers treat as "someone else already
    /// applied this transition".
    async fn transition_order(
        &mut self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError>;

    async fn record_payment(&mut self, order_id: Uuid, payment_id: &str) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CommerceStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn product(&self, id: Uuid) -> Result<Option<Product>, StoreError>;
    async fn insert_product(&self, product: &Product) -> Result<(), StoreError>;

    /// Cart lines joined with their live products. Lines whose product
    /// has vanished are omitted, matching a join on the product table.
    async fn cart_snapshot(&self, user_id: Uuid) -> Result<Vec<CartEntry>, StoreError>;
    async fn cart_item(&self, user_id: Uuid, item_id: Uuid) -> Result<Option<CartLine>, StoreError>;
    async fn find_cart_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<CartLine>, StoreError>;
    /// Upserts the (cart, product) line to an absolute quantity.
    async fn set_cart_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartLine, StoreError>;
    async fn remove_cart_item(&self, user_id: Uuid, item_id: Uuid) -> Result<bool, StoreError>;

    async fn order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;
    async fn order_for_user(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<Order>, StoreError>;
    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError>;
    async fn orders_for_vendor(&self, vendor_id: Uuid) -> Result<Vec<Order>, StoreError>;
    async fn all_orders(&self) -> Result<Vec<Order>, StoreError>;
    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError>;
}
