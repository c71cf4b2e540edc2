//! PostgreSQL store
//!
//! The checkout critical section maps onto `SELECT ... FOR UPDATE`
//! ordered by product id plus a guarded `UPDATE ... WHERE stock >= $n`
//! decrement; webhook transitions are a single compare-and-set on the
//! status column.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::aggregates::{CartEntry, CartLine, Order, OrderItem, OrderStatus, Product};

use super::{CommerceStore, StoreError, StoreTx};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_cart(&self, user_id: Uuid) -> Result<Uuid, StoreError> {
        let (cart_id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO carts (id, user_id, created_at) VALUES ($1, $2, NOW())
             ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
             RETURNING id",
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(cart_id)
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn cart_lines(&mut self, user_id: Uuid) -> Result<Vec<CartLine>, StoreError> {
        let lines = sqlx::query_as::<_, CartLine>(
            "SELECT ci.id, ci.product_id, ci.quantity
             FROM cart_items ci JOIN carts c ON ci.cart_id = c.id
             WHERE c.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(lines)
    }

    async fn products_for_update(&mut self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
        // ORDER BY id fixes the lock acquisition order across
        // concurrent transactions touching overlapping product sets.
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(products)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orders (id, user_id, status, total_amount, currency,
                                 payment_intent_id, payment_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.status)
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(&order.payment_intent_id)
        .bind(&order.payment_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn reserve_stock(&mut self, product_id: Uuid, quantity: i32) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock - $2, updated_at = NOW()
             WHERE id = $1 AND stock >= $2",
        )
        .bind(product_id)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO order_items (id, order_id, product_id, vendor_id,
                                      title_snapshot, unit_price, quantity)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(item.id)
        .bind(item.order_id)
        .bind(item.product_id)
        .bind(item.vendor_id)
        .bind(&item.title_snapshot)
        .bind(item.unit_price)
        .bind(item.quantity)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_order_total(&mut self, order_id: Uuid, total: Decimal) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET total_amount = $2, updated_at = NOW() WHERE id = $1")
            .bind(order_id)
            .bind(total)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn clear_cart(&mut self, user_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM cart_items
             WHERE cart_id IN (SELECT id FROM carts WHERE user_id = $1)",
        )
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn order_by_intent(&mut self, intent_id: &str) -> Result<Option<Order>, StoreError> {
        // FOR UPDATE serializes concurrent deliveries of the same
        // webhook against this order row.
        let order = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE payment_intent_id = $1 FOR UPDATE",
        )
        .bind(intent_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(order)
    }

    async fn order_for_update(&mut self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(order)
    }

    async fn transition_order(
        &mut self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = NOW()
             WHERE id = $1 AND status = $2",
        )
        .bind(order_id)
        .bind(from)
        .bind(to)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_payment(&mut self, order_id: Uuid, payment_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET payment_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(order_id)
            .bind(payment_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CommerceStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(PgTx {
            tx: self.pool.begin().await?,
        }))
    }

    async fn product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO products (id, vendor_id, title, price, stock, is_active,
                                   created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(product.id)
        .bind(product.vendor_id)
        .bind(&product.title)
        .bind(product.price)
        .bind(product.stock)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cart_snapshot(&self, user_id: Uuid) -> Result<Vec<CartEntry>, StoreError> {
        let lines = sqlx::query_as::<_, CartLine>(
            "SELECT ci.id, ci.product_id, ci.quantity
             FROM cart_items ci JOIN carts c ON ci.cart_id = c.id
             WHERE c.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let products = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(lines
            .into_iter()
            .filter_map(|line| {
                products
                    .iter()
                    .find(|p| p.id == line.product_id)
                    .cloned()
                    .map(|product| CartEntry { line, product })
            })
            .collect())
    }

    async fn cart_item(&self, user_id: Uuid, item_id: Uuid) -> Result<Option<CartLine>, StoreError> {
        let line = sqlx::query_as::<_, CartLine>(
            "SELECT ci.id, ci.product_id, ci.quantity
             FROM cart_items ci JOIN carts c ON ci.cart_id = c.id
             WHERE c.user_id = $1 AND ci.id = $2",
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(line)
    }

    async fn find_cart_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<CartLine>, StoreError> {
        let line = sqlx::query_as::<_, CartLine>(
            "SELECT ci.id, ci.product_id, ci.quantity
             FROM cart_items ci JOIN carts c ON ci.cart_id = c.id
             WHERE c.user_id = $1 AND ci.product_id = $2",
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(line)
    }

    async fn set_cart_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartLine, StoreError> {
        let cart_id = self.ensure_cart(user_id).await?;
        let line = sqlx::query_as::<_, CartLine>(
            "INSERT INTO cart_items (id, cart_id, product_id, quantity)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (cart_id, product_id) DO UPDATE SET quantity = EXCLUDED.quantity
             RETURNING id, product_id, quantity",
        )
        .bind(Uuid::now_v7())
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity)
        .fetch_one(&self.pool)
        .await?;
        Ok(line)
    }

    async fn remove_cart_item(&self, user_id: Uuid, item_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM cart_items ci USING carts c
             WHERE ci.cart_id = c.id AND c.user_id = $1 AND ci.id = $2",
        )
        .bind(user_id)
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    async fn order_for_user(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<Order>, StoreError> {
        let order =
            sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 AND user_id = $2")
                .bind(order_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(order)
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    async fn orders_for_vendor(&self, vendor_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT DISTINCT o.* FROM orders o
             JOIN order_items oi ON oi.order_id = o.id
             WHERE oi.vendor_id = $1
             ORDER BY o.created_at DESC",
        )
        .bind(vendor_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    async fn all_orders(&self) -> Result<Vec<Order>, StoreError> {
        let orders =
            sqlx::query_as::<_, Order>("SELECT * FROM orders ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(orders)
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let items =
            sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = $1")
                .bind(order_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(items)
    }
}
