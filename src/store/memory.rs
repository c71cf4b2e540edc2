//! In-memory store
//!
//! Backs the test suites and provider-less local runs. A transaction
//! clones the whole state behind a store-wide async mutex and swaps
//! the clone back in on commit, so writes are all-or-nothing and
//! transactions are serialized, the coarse equivalent of the row
//! locking the Postgres backend relies on.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::aggregates::{CartEntry, CartLine, Order, OrderItem, OrderStatus, Product};

use super::{CommerceStore, StoreError, StoreTx};

#[derive(Default, Clone)]
struct MemState {
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, Vec<CartLine>>,
    orders: HashMap<Uuid, Order>,
    order_items: HashMap<Uuid, Vec<OrderItem>>,
}

#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemState>,
    working: MemState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn cart_lines(&mut self, user_id: Uuid) -> Result<Vec<CartLine>, StoreError> {
        Ok(self.working.carts.get(&user_id).cloned().unwrap_or_default())
    }

    async fn products_for_update(&mut self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
        // The whole store is locked here; honoring the sorted id order
        // keeps the contract identical to the Postgres backend.
        Ok(ids
            .iter()
            .filter_map(|id| self.working.products.get(id).cloned())
            .collect())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn reserve_stock(&mut self, product_id: Uuid, quantity: i32) -> Result<bool, StoreError> {
        match self.working.products.get_mut(&product_id) {
            Some(p) if p.stock >= quantity => {
                p.stock -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<(), StoreError> {
        self.working
            .order_items
            .entry(item.order_id)
            .or_default()
            .push(item.clone());
        Ok(())
    }

    async fn update_order_total(&mut self, order_id: Uuid, total: Decimal) -> Result<(), StoreError> {
        if let Some(order) = self.working.orders.get_mut(&order_id) {
            order.total_amount = total;
            order.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn clear_cart(&mut self, user_id: Uuid) -> Result<(), StoreError> {
        self.working.carts.remove(&user_id);
        Ok(())
    }

    async fn order_by_intent(&mut self, intent_id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self
            .working
            .orders
            .values()
            .find(|o| o.payment_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn order_for_update(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn transition_order(
        &mut self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        match self.working.orders.get_mut(&order_id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_payment(&mut self, order_id: Uuid, payment_id: &str) -> Result<(), StoreError> {
        if let Some(order) = self.working.orders.get_mut(&order_id) {
            order.payment_id = Some(payment_id.to_string());
            order.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl CommerceStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .products
            .insert(product.id, product.clone());
        Ok(())
    }

    async fn cart_snapshot(&self, user_id: Uuid) -> Result<Vec<CartEntry>, StoreError> {
        let state = self.state.lock().await;
        let lines = state.carts.get(&user_id).cloned().unwrap_or_default();
        Ok(lines
            .into_iter()
            .filter_map(|line| {
                state
                    .products
                    .get(&line.product_id)
                    .cloned()
                    .map(|product| CartEntry { line, product })
            })
            .collect())
    }

    async fn cart_item(&self, user_id: Uuid, item_id: Uuid) -> Result<Option<CartLine>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .carts
            .get(&user_id)
            .and_then(|lines| lines.iter().find(|l| l.id == item_id).cloned()))
    }

    async fn find_cart_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<CartLine>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .carts
            .get(&user_id)
            .and_then(|lines| lines.iter().find(|l| l.product_id == product_id).cloned()))
    }

    async fn set_cart_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartLine, StoreError> {
        let mut state = self.state.lock().await;
        let lines = state.carts.entry(user_id).or_default();
        if let Some(line) = lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity = quantity;
            Ok(line.clone())
        } else {
            let line = CartLine::new(product_id, quantity);
            lines.push(line.clone());
            Ok(line)
        }
    }

    async fn remove_cart_item(&self, user_id: Uuid, item_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(lines) = state.carts.get_mut(&user_id) {
            let before = lines.len();
            lines.retain(|l| l.id != item_id);
            return Ok(lines.len() != before);
        }
        Ok(false)
    }

    async fn order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn order_for_user(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .get(&order_id)
            .filter(|o| o.user_id == user_id)
            .cloned())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn orders_for_vendor(&self, vendor_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| {
                state
                    .order_items
                    .get(&o.id)
                    .is_some_and(|items| items.iter().any(|i| i.vendor_id == Some(vendor_id)))
            })
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn all_orders(&self) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.order_items.get(&order_id).cloned().unwrap_or_default())
    }
}
