//! Stride Commerce - checkout and payment reconciliation service

use anyhow::Result;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use validator::Validate;

use stride_commerce::domain::aggregates::{Order, OrderItem, OrderStatus};
use stride_commerce::domain::events::OrderEvent;
use stride_commerce::domain::value_objects::{round_half_up, Role};
use stride_commerce::payments::StripeGateway;
use stride_commerce::store::{CommerceStore, PgStore, StoreError};
use stride_commerce::{CheckoutEngine, CheckoutError, WebhookError, WebhookOutcome};

#[derive(Clone)]
struct AppState {
    store: Arc<dyn CommerceStore>,
    engine: Arc<CheckoutEngine>,
    nats: Option<async_nats::Client>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&std::env::var("DATABASE_URL")?)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match std::env::var("NATS_URL").ok() {
        Some(url) => async_nats::connect(&url).await.ok(),
        None => None,
    };

    let store: Arc<dyn CommerceStore> = Arc::new(PgStore::new(db));
    let provider = StripeGateway::new(std::env::var("STRIPE_SECRET_KEY").unwrap_or_default());
    let engine = Arc::new(CheckoutEngine::new(
        store.clone(),
        Arc::new(provider),
        std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
        std::env::var("CURRENCY").unwrap_or_else(|_| "USD".to_string()),
    ));
    let state = AppState { store, engine, nats };

    let app = Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "stride-commerce"})) }))
        .route("/api/v1/cart", get(get_cart))
        .route("/api/v1/cart/items", post(add_cart_item))
        .route("/api/v1/cart/items/:id", put(update_cart_item).delete(remove_cart_item))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/payments/intent", post(create_payment_intent))
        .route("/api/v1/payments/webhook", post(stripe_webhook))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/vendor/orders", get(vendor_orders))
        .route("/api/v1/admin/orders", get(admin_list_orders))
        .route("/api/v1/admin/orders/:id", put(admin_update_order))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    tracing::info!("🚀 stride-commerce listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}

// The gateway in front of this service authenticates the caller and
// forwards the identity in headers; requests without one are rejected.
#[derive(Debug, Clone, Copy)]
struct AuthUser {
    id: Uuid,
    role: Role,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok());
        let role = parts
            .headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Role>().ok());
        match (id, role) {
            (Some(id), Some(role)) => Ok(AuthUser { id, role }),
            _ => Err(error_response(StatusCode::UNAUTHORIZED, "Missing or invalid identity")),
        }
    }
}

fn error_response(status: StatusCode, message: impl ToString) -> (StatusCode, Json<Value>) {
    (status, Json(json!({"error": message.to_string()})))
}

fn store_error(e: StoreError) -> (StatusCode, Json<Value>) {
    tracing::error!(%e, "store error");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage failure")
}

fn checkout_error(e: CheckoutError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        CheckoutError::CartEmpty
        | CheckoutError::ProductUnavailable { .. }
        | CheckoutError::InvalidQuantity { .. }
        | CheckoutError::InsufficientStock { .. }
        | CheckoutError::AmountOverflow
        | CheckoutError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        CheckoutError::OrderNotFound => StatusCode::NOT_FOUND,
        CheckoutError::Provider(_) => StatusCode::BAD_GATEWAY,
        CheckoutError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(%e, "checkout failed");
    }
    error_response(status, e)
}

async fn publish_event(state: &AppState, event: OrderEvent) {
    let Some(nats) = &state.nats else { return };
    match serde_json::to_vec(&event) {
        Ok(payload) => {
            if let Err(e) = nats.publish(event.subject(), payload.into()).await {
                tracing::warn!(%e, subject = event.subject(), "order event not published");
            }
        }
        Err(e) => tracing::warn!(%e, "order event not serializable"),
    }
}

// ---------------------------------------------------------------------------
// Cart

#[derive(Serialize)]
struct CartItemView {
    id: Uuid,
    product_id: Uuid,
    title: String,
    unit_price: Decimal,
    quantity: i32,
    subtotal: Decimal,
}

async fn get_cart(State(s): State<AppState>, user: AuthUser) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let entries = s.store.cart_snapshot(user.id).await.map_err(store_error)?;
    let total = stride_commerce::domain::aggregates::cart_total(&entries);
    let items: Vec<CartItemView> = entries
        .into_iter()
        .map(|e| CartItemView {
            id: e.line.id,
            product_id: e.product.id,
            title: e.product.title.clone(),
            unit_price: round_half_up(e.product.price),
            quantity: e.line.quantity,
            subtotal: e.subtotal(),
        })
        .collect();
    Ok(Json(json!({"items": items, "total": total})))
}

#[derive(Debug, Deserialize, Validate)]
struct AddToCartRequest {
    product_id: Uuid,
    #[validate(range(min = 1))]
    quantity: i32,
}

async fn add_cart_item(
    State(s): State<AppState>,
    user: AuthUser,
    Json(r): Json<AddToCartRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    r.validate()
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
    let product = s
        .store
        .product(r.product_id)
        .await
        .map_err(store_error)?
        .filter(|p| p.is_active)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Product not found"))?;

    let existing = s
        .store
        .find_cart_item(user.id, product.id)
        .await
        .map_err(store_error)?;
    let merged = existing.as_ref().map_or(0, |l| l.quantity) + r.quantity;
    if merged > product.stock {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("Not enough stock for {}", product.title),
        ));
    }

    let line = s
        .store
        .set_cart_item(user.id, product.id, merged)
        .await
        .map_err(store_error)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"id": line.id, "product_id": line.product_id, "quantity": line.quantity})),
    ))
}

#[derive(Debug, Deserialize)]
struct UpdateCartItemRequest {
    quantity: i32,
}

async fn update_cart_item(
    State(s): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
    Json(r): Json<UpdateCartItemRequest>,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let line = s
        .store
        .cart_item(user.id, item_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Cart item not found"))?;

    if r.quantity < 1 {
        s.store
            .remove_cart_item(user.id, item_id)
            .await
            .map_err(store_error)?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let product = s
        .store
        .product(line.product_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Product not found"))?;
    if r.quantity > product.stock {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("Not enough stock for {}", product.title),
        ));
    }

    let line = s
        .store
        .set_cart_item(user.id, product.id, r.quantity)
        .await
        .map_err(store_error)?;
    Ok(Json(json!({"id": line.id, "product_id": line.product_id, "quantity": line.quantity})).into_response())
}

async fn remove_cart_item(
    State(s): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let removed = s
        .store
        .remove_cart_item(user.id, item_id)
        .await
        .map_err(store_error)?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(error_response(StatusCode::NOT_FOUND, "Cart item not found"))
    }
}

// ---------------------------------------------------------------------------
// Checkout and payments

#[derive(Serialize)]
struct OrderItemResponse {
    id: Uuid,
    product_id: Option<Uuid>,
    vendor_id: Option<Uuid>,
    title: String,
    unit_price: Decimal,
    quantity: i32,
    subtotal: Decimal,
}

#[derive(Serialize)]
struct OrderResponse {
    #[serde(flatten)]
    order: Order,
    items: Vec<OrderItemResponse>,
}

fn item_response(item: OrderItem) -> OrderItemResponse {
    OrderItemResponse {
        id: item.id,
        product_id: item.product_id,
        vendor_id: item.vendor_id,
        subtotal: item.subtotal(),
        title: item.title_snapshot,
        unit_price: item.unit_price,
        quantity: item.quantity,
    }
}

async fn order_response(s: &AppState, order: Order) -> Result<OrderResponse, (StatusCode, Json<Value>)> {
    let items = s.store.order_items(order.id).await.map_err(store_error)?;
    Ok(OrderResponse {
        order,
        items: items.into_iter().map(item_response).collect(),
    })
}

#[derive(Debug, Deserialize, Default)]
struct CheckoutRequest {
    payment_intent_id: Option<String>,
}

async fn checkout(
    State(s): State<AppState>,
    user: AuthUser,
    r: Option<Json<CheckoutRequest>>,
) -> Result<(StatusCode, Json<OrderResponse>), (StatusCode, Json<Value>)> {
    let r = r.map(|Json(r)| r).unwrap_or_default();
    let placed = s
        .engine
        .checkout(user.id, r.payment_intent_id)
        .await
        .map_err(checkout_error)?;
    publish_event(
        &s,
        OrderEvent::Created {
            order_id: placed.order.id,
            user_id: placed.order.user_id,
            total_amount: placed.order.total_amount,
            currency: placed.order.currency.clone(),
        },
    )
    .await;
    let response = OrderResponse {
        items: placed.items.into_iter().map(item_response).collect(),
        order: placed.order,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentQuoteResponse {
    client_secret: String,
    intent_id: String,
    amount: Decimal,
    currency: String,
}

async fn create_payment_intent(
    State(s): State<AppState>,
    user: AuthUser,
) -> Result<Json<PaymentQuoteResponse>, (StatusCode, Json<Value>)> {
    let quote = s
        .engine
        .create_payment_intent(user.id)
        .await
        .map_err(checkout_error)?;
    Ok(Json(PaymentQuoteResponse {
        client_secret: quote.client_secret,
        intent_id: quote.intent_id,
        amount: quote.amount,
        currency: quote.currency,
    }))
}

async fn stripe_webhook(
    State(s): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let outcome = s.engine.handle_webhook(&body, signature).await.map_err(|e| {
        let status = match &e {
            WebhookError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        error_response(status, e)
    })?;
    if let WebhookOutcome::Applied { order_id, status } = outcome {
        match status {
            OrderStatus::Paid => publish_event(&s, OrderEvent::Paid { order_id }).await,
            OrderStatus::Failed => publish_event(&s, OrderEvent::Failed { order_id }).await,
            _ => {}
        }
    }
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// Orders

async fn list_orders(State(s): State<AppState>, user: AuthUser) -> Result<Json<Vec<OrderResponse>>, (StatusCode, Json<Value>)> {
    let orders = s.store.orders_for_user(user.id).await.map_err(store_error)?;
    let mut out = Vec::with_capacity(orders.len());
    for order in orders {
        out.push(order_response(&s, order).await?);
    }
    Ok(Json(out))
}

async fn get_order(
    State(s): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, (StatusCode, Json<Value>)> {
    let order = s
        .store
        .order_for_user(user.id, order_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Order not found"))?;
    Ok(Json(order_response(&s, order).await?))
}

async fn cancel_order(
    State(s): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, (StatusCode, Json<Value>)> {
    let order = s
        .engine
        .cancel_order(user.id, order_id)
        .await
        .map_err(checkout_error)?;
    publish_event(&s, OrderEvent::Canceled { order_id: order.id }).await;
    Ok(Json(order_response(&s, order).await?))
}

async fn vendor_orders(State(s): State<AppState>, user: AuthUser) -> Result<Json<Vec<OrderResponse>>, (StatusCode, Json<Value>)> {
    match user.role {
        Role::Vendor | Role::Manager | Role::Admin => {}
        Role::Customer => return Err(error_response(StatusCode::FORBIDDEN, "Vendor access required")),
    }
    let orders = s.store.orders_for_vendor(user.id).await.map_err(store_error)?;
    let mut out = Vec::with_capacity(orders.len());
    for order in orders {
        out.push(order_response(&s, order).await?);
    }
    Ok(Json(out))
}

fn require_staff(user: AuthUser) -> Result<(), (StatusCode, Json<Value>)> {
    match user.role {
        Role::Manager | Role::Admin => Ok(()),
        Role::Customer | Role::Vendor => {
            Err(error_response(StatusCode::FORBIDDEN, "Staff access required"))
        }
    }
}

async fn admin_list_orders(State(s): State<AppState>, user: AuthUser) -> Result<Json<Vec<OrderResponse>>, (StatusCode, Json<Value>)> {
    require_staff(user)?;
    let orders = s.store.all_orders().await.map_err(store_error)?;
    let mut out = Vec::with_capacity(orders.len());
    for order in orders {
        out.push(order_response(&s, order).await?);
    }
    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
struct AdminOrderUpdateRequest {
    status: OrderStatus,
}

async fn admin_update_order(
    State(s): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(r): Json<AdminOrderUpdateRequest>,
) -> Result<Json<OrderResponse>, (StatusCode, Json<Value>)> {
    require_staff(user)?;
    let order = s
        .engine
        .advance_order(order_id, r.status)
        .await
        .map_err(checkout_error)?;
    if r.status == OrderStatus::Canceled {
        publish_event(&s, OrderEvent::Canceled { order_id: order.id }).await;
    }
    Ok(Json(order_response(&s, order).await?))
}
