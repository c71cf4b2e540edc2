//! Checkout engine and payment reconciliation
//!
//! The two flows that are allowed to touch money and stock:
//!
//! - [`CheckoutEngine::checkout`] turns a cart into an immutable order
//!   inside one storage transaction: lock products in id order,
//!   re-validate stock under the lock, decrement with a guarded
//!   update, snapshot items, fix the total, clear the cart. Any
//!   failure discards the lot.
//! - [`CheckoutEngine::handle_webhook`] applies provider callbacks to
//!   order status through the transition table on
//!   [`OrderStatus::on_payment_outcome`], so redelivered events land
//!   on a no-op row instead of re-applying side effects.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::aggregates::{
    cart_total, Order, OrderItem, OrderStatus, PaymentOutcome, Product,
};
use crate::domain::value_objects::{line_total, minor_units, round_half_up};
use crate::payments::webhook::{self, EventKind, ParseError, SignatureError};
use crate::payments::{IntentRequest, PaymentError, PaymentProvider};
use crate::store::{CommerceStore, StoreError};

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("cart is empty")]
    CartEmpty,
    #[error("product unavailable: {product_id}")]
    ProductUnavailable { product_id: Uuid },
    #[error("invalid quantity for {title}")]
    InvalidQuantity { title: String },
    #[error("not enough stock for {title}")]
    InsufficientStock { title: String },
    #[error("order total is not a valid charge amount")]
    AmountOverflow,
    #[error("order not found")]
    OrderNotFound,
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error(transparent)]
    Provider(#[from] PaymentError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("webhook signing secret is not configured")]
    MissingSecret,
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Payload(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A committed checkout: the order plus its item snapshots.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// What intent creation hands back to the client.
#[derive(Debug, Clone)]
pub struct PaymentQuote {
    pub intent_id: String,
    pub client_secret: String,
    pub amount: Decimal,
    pub currency: String,
}

/// How a verified webhook delivery landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The transition table fired and side effects were committed.
    Applied { order_id: Uuid, status: OrderStatus },
    /// The order had already left `pending`; nothing was re-applied.
    AlreadySettled { order_id: Uuid, status: OrderStatus },
    /// No order carries this payment intent; acknowledged untouched.
    Unmatched,
    /// Event kind outside the reconciler's vocabulary.
    Ignored,
}

pub struct CheckoutEngine {
    store: Arc<dyn CommerceStore>,
    provider: Arc<dyn PaymentProvider>,
    webhook_secret: Option<String>,
    currency: String,
}

impl CheckoutEngine {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        provider: Arc<dyn PaymentProvider>,
        webhook_secret: Option<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            webhook_secret,
            currency: currency.into(),
        }
    }

    /// Converts the user's cart into a priced, stock-reserved order.
    /// All writes commit together or not at all.
    pub async fn checkout(
        &self,
        user_id: Uuid,
        payment_intent_id: Option<String>,
    ) -> Result<PlacedOrder, CheckoutError> {
        let mut tx = self.store.begin().await?;

        let lines = tx.cart_lines(user_id).await?;
        if lines.is_empty() {
            return Err(CheckoutError::CartEmpty);
        }

        // Lock order is sorted product id, so two checkouts over
        // overlapping carts always contend in the same sequence.
        let mut ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        ids.sort();
        ids.dedup();
        let products: HashMap<Uuid, Product> = tx
            .products_for_update(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        // Validate every line against locked stock before any write.
        for line in &lines {
            let product = products
                .get(&line.product_id)
                .ok_or(CheckoutError::ProductUnavailable {
                    product_id: line.product_id,
                })?;
            if line.quantity <= 0 {
                return Err(CheckoutError::InvalidQuantity {
                    title: product.title.clone(),
                });
            }
            if product.stock < line.quantity {
                return Err(CheckoutError::InsufficientStock {
                    title: product.title.clone(),
                });
            }
        }

        let mut order = Order::pending(user_id, self.currency.clone(), payment_intent_id);
        tx.insert_order(&order).await?;

        let mut running_total = Decimal::ZERO;
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = &products[&line.product_id];

            // Second line of defense behind the row lock: the
            // decrement itself re-checks stock and matches nothing on
            // a lost race, which aborts the whole transaction.
            if !tx.reserve_stock(product.id, line.quantity).await? {
                return Err(CheckoutError::InsufficientStock {
                    title: product.title.clone(),
                });
            }

            let unit_price = round_half_up(product.price);
            let item = OrderItem::snapshot(order.id, product, unit_price, line.quantity);
            tx.insert_order_item(&item).await?;
            running_total += line_total(unit_price, line.quantity);
            items.push(item);
        }

        let total = round_half_up(running_total);
        tx.update_order_total(order.id, total).await?;
        tx.clear_cart(user_id).await?;
        tx.commit().await?;

        order.total_amount = total;
        info!(order_id = %order.id, %total, items = items.len(), "checkout committed");
        Ok(PlacedOrder { order, items })
    }

    /// Quotes the cart and mints a provider intent for it. Reads live
    /// prices and stock without locking anything; the authoritative
    /// stock check happens again inside [`Self::checkout`].
    pub async fn create_payment_intent(&self, user_id: Uuid) -> Result<PaymentQuote, CheckoutError> {
        let entries = self.store.cart_snapshot(user_id).await?;
        if entries.is_empty() {
            return Err(CheckoutError::CartEmpty);
        }

        for entry in &entries {
            if entry.line.quantity <= 0 {
                return Err(CheckoutError::InvalidQuantity {
                    title: entry.product.title.clone(),
                });
            }
            if entry.product.stock < entry.line.quantity {
                return Err(CheckoutError::InsufficientStock {
                    title: entry.product.title.clone(),
                });
            }
        }

        let amount = cart_total(&entries);
        let amount_minor = minor_units(amount).ok_or(CheckoutError::AmountOverflow)?;
        let intent = self
            .provider
            .create_intent(IntentRequest {
                amount_minor,
                currency: self.currency.clone(),
                user_id,
            })
            .await?;

        info!(intent_id = %intent.id, %amount, "payment intent created");
        Ok(PaymentQuote {
            intent_id: intent.id,
            client_secret: intent.client_secret,
            amount,
            currency: self.currency.clone(),
        })
    }

    /// Verifies and applies one provider delivery. Safe to call any
    /// number of times with the same payload.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookOutcome, WebhookError> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or(WebhookError::MissingSecret)?;
        let now = chrono::Utc::now().timestamp();
        webhook::verify_signature(payload, signature_header, secret, now)?;

        let event = webhook::parse_event(payload)?;
        let outcome = match event.kind {
            EventKind::IntentSucceeded => PaymentOutcome::Succeeded,
            EventKind::IntentFailed => PaymentOutcome::Failed,
            EventKind::IntentCanceled => PaymentOutcome::Canceled,
            EventKind::Other(kind) => {
                debug!(%kind, "ignoring webhook event");
                return Ok(WebhookOutcome::Ignored);
            }
        };
        let intent_id = event
            .intent_id
            .as_deref()
            .ok_or(WebhookError::Payload(ParseError::MissingIntent))?;

        let mut tx = self.store.begin().await?;
        let Some(order) = tx.order_by_intent(intent_id).await? else {
            // Possibly an intent from an abandoned flow that never
            // reached checkout. Not ours to act on, and erroring would
            // only make the provider retry.
            debug!(intent_id, "webhook for unknown intent acknowledged");
            return Ok(WebhookOutcome::Unmatched);
        };

        let Some(next) = order.status.on_payment_outcome(outcome) else {
            return Ok(WebhookOutcome::AlreadySettled {
                order_id: order.id,
                status: order.status,
            });
        };

        if !tx.transition_order(order.id, order.status, next).await? {
            // A concurrent delivery won the compare-and-set.
            return Ok(WebhookOutcome::AlreadySettled {
                order_id: order.id,
                status: next,
            });
        }
        if next == OrderStatus::Paid {
            if let Some(charge_id) = &event.charge_id {
                tx.record_payment(order.id, charge_id).await?;
            }
            // The intent flow settles payment without a second
            // checkout call, so the cart may still hold the purchased
            // lines. This clears the owner's whole current cart.
            tx.clear_cart(order.user_id).await?;
        }
        tx.commit().await?;

        info!(order_id = %order.id, from = %order.status, to = %next, "payment reconciled");
        Ok(WebhookOutcome::Applied {
            order_id: order.id,
            status: next,
        })
    }

    /// Customer-initiated cancel. Only a pending order can be
    /// canceled, and stock is never restored here; checkout is the
    /// sole writer of stock.
    pub async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> Result<Order, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .order_for_update(order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or(CheckoutError::OrderNotFound)?;
        self.apply_transition(tx, order, OrderStatus::Canceled).await
    }

    /// Operator-driven status advancement along the fulfillment path.
    pub async fn advance_order(&self, order_id: Uuid, to: OrderStatus) -> Result<Order, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .order_for_update(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound)?;
        self.apply_transition(tx, order, to).await
    }

    async fn apply_transition(
        &self,
        mut tx: Box<dyn crate::store::StoreTx>,
        mut order: Order,
        to: OrderStatus,
    ) -> Result<Order, CheckoutError> {
        if !order.status.can_advance_to(to) {
            return Err(CheckoutError::InvalidTransition {
                from: order.status,
                to,
            });
        }
        if !tx.transition_order(order.id, order.status, to).await? {
            return Err(CheckoutError::InvalidTransition {
                from: order.status,
                to,
            });
        }
        tx.commit().await?;
        info!(order_id = %order.id, from = %order.status, to = %to, "order status advanced");
        order.status = to;
        Ok(order)
    }
}
