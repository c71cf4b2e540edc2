mod common;

use common::*;
use rust_decimal_macros::dec;
use uuid::Uuid;

use stride_commerce::domain::aggregates::OrderStatus;
use stride_commerce::store::CommerceStore;
use stride_commerce::CheckoutError;

#[tokio::test]
async fn checkout_prices_snapshots_and_reserves_stock() {
    let h = harness();
    let user = Uuid::now_v7();
    let product = seed_product(&h.store, "Court Classic", dec!(29.99), 10).await;
    put_in_cart(&h.store, user, &product, 2).await;

    let placed = h.engine.checkout(user, None).await.unwrap();

    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(placed.order.total_amount, dec!(59.98));
    assert_eq!(placed.order.currency, "USD");
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].unit_price, dec!(29.99));
    assert_eq!(placed.items[0].quantity, 2);
    assert_eq!(placed.items[0].title_snapshot, "Court Classic");
    assert_eq!(placed.items[0].vendor_id, Some(product.vendor_id));

    // stock reserved, cart emptied, order persisted
    let after = h.store.product(product.id).await.unwrap().unwrap();
    assert_eq!(after.stock, 8);
    assert!(h.store.cart_snapshot(user).await.unwrap().is_empty());
    let stored = h.store.order(placed.order.id).await.unwrap().unwrap();
    assert_eq!(stored.total_amount, dec!(59.98));
}

#[tokio::test]
async fn checkout_of_emptied_cart_fails_instead_of_reordering() {
    let h = harness();
    let user = Uuid::now_v7();
    let product = seed_product(&h.store, "Court Classic", dec!(29.99), 10).await;
    put_in_cart(&h.store, user, &product, 2).await;

    h.engine.checkout(user, None).await.unwrap();
    let second = h.engine.checkout(user, None).await;

    assert!(matches!(second, Err(CheckoutError::CartEmpty)));
    let after = h.store.product(product.id).await.unwrap().unwrap();
    assert_eq!(after.stock, 8);
}

#[tokio::test]
async fn empty_cart_cannot_check_out() {
    let h = harness();
    let result = h.engine.checkout(Uuid::now_v7(), None).await;
    assert!(matches!(result, Err(CheckoutError::CartEmpty)));
}

#[tokio::test]
async fn insufficient_stock_leaves_no_trace() {
    let h = harness();
    let user = Uuid::now_v7();
    let product = seed_product(&h.store, "Trail Mid", dec!(49.50), 10).await;
    put_in_cart(&h.store, user, &product, 15).await;

    let result = h.engine.checkout(user, None).await;

    match result {
        Err(CheckoutError::InsufficientStock { title }) => assert_eq!(title, "Trail Mid"),
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
    let after = h.store.product(product.id).await.unwrap().unwrap();
    assert_eq!(after.stock, 10);
    assert!(h.store.all_orders().await.unwrap().is_empty());
    assert_eq!(h.store.cart_snapshot(user).await.unwrap().len(), 1);
}

#[tokio::test]
async fn one_short_line_aborts_the_whole_cart() {
    let h = harness();
    let user = Uuid::now_v7();
    let plenty = seed_product(&h.store, "Slide", dec!(19.99), 50).await;
    let scarce = seed_product(&h.store, "Limited Drop", dec!(199.99), 1).await;
    put_in_cart(&h.store, user, &plenty, 2).await;
    put_in_cart(&h.store, user, &scarce, 3).await;

    let result = h.engine.checkout(user, None).await;

    match result {
        Err(CheckoutError::InsufficientStock { title }) => assert_eq!(title, "Limited Drop"),
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
    // neither product lost stock, nothing was written
    assert_eq!(h.store.product(plenty.id).await.unwrap().unwrap().stock, 50);
    assert_eq!(h.store.product(scarce.id).await.unwrap().unwrap().stock, 1);
    assert!(h.store.all_orders().await.unwrap().is_empty());
    assert_eq!(h.store.cart_snapshot(user).await.unwrap().len(), 2);
}

#[tokio::test]
async fn non_positive_quantity_is_rejected() {
    let h = harness();
    let user = Uuid::now_v7();
    let product = seed_product(&h.store, "Runner", dec!(25.00), 10).await;
    put_in_cart(&h.store, user, &product, 0).await;

    let result = h.engine.checkout(user, None).await;

    match result {
        Err(CheckoutError::InvalidQuantity { title }) => assert_eq!(title, "Runner"),
        other => panic!("expected InvalidQuantity, got {other:?}"),
    }
    assert_eq!(h.store.product(product.id).await.unwrap().unwrap().stock, 10);
}

#[tokio::test]
async fn unit_prices_round_before_multiplication() {
    let h = harness();
    let user = Uuid::now_v7();
    let a = seed_product(&h.store, "Odd Priced", dec!(10.005), 10).await;
    let b = seed_product(&h.store, "Even Priced", dec!(19.999), 10).await;
    put_in_cart(&h.store, user, &a, 3).await;
    put_in_cart(&h.store, user, &b, 1).await;

    let placed = h.engine.checkout(user, None).await.unwrap();

    // 10.01 * 3 + 20.00, not round(10.005 * 3) + ...
    assert_eq!(placed.order.total_amount, dec!(50.03));
    let units: Vec<_> = placed.items.iter().map(|i| i.unit_price).collect();
    assert!(units.contains(&dec!(10.01)));
    assert!(units.contains(&dec!(20.00)));
}

#[tokio::test]
async fn checkout_snapshots_the_price_current_at_commit_time() {
    let h = harness();
    let user = Uuid::now_v7();
    let mut product = seed_product(&h.store, "Reprice Me", dec!(30.00), 10).await;
    put_in_cart(&h.store, user, &product, 1).await;

    let quote = h.engine.create_payment_intent(user).await.unwrap();
    assert_eq!(quote.amount, dec!(30.00));

    // a price change between quote and checkout is not revalidated
    product.price = dec!(35.00);
    h.store.insert_product(&product).await.unwrap();

    let placed = h.engine.checkout(user, Some(quote.intent_id)).await.unwrap();
    assert_eq!(placed.order.total_amount, dec!(35.00));
    assert_eq!(placed.items[0].unit_price, dec!(35.00));
}

#[tokio::test]
async fn checkout_links_the_supplied_intent() {
    let h = harness();
    let user = Uuid::now_v7();
    let product = seed_product(&h.store, "Linked", dec!(12.00), 3).await;
    put_in_cart(&h.store, user, &product, 1).await;

    let placed = h.engine.checkout(user, Some("pi_abc".to_string())).await.unwrap();
    assert_eq!(placed.order.payment_intent_id.as_deref(), Some("pi_abc"));
    assert!(placed.order.payment_id.is_none());
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell() {
    let h = harness();
    let product = seed_product(&h.store, "Hype Drop", dec!(120.00), 5).await;

    let users: Vec<Uuid> = (0..8).map(|_| Uuid::now_v7()).collect();
    for user in &users {
        put_in_cart(&h.store, *user, &product, 1).await;
    }

    let mut tasks = tokio::task::JoinSet::new();
    for user in users {
        let engine = h.engine.clone();
        tasks.spawn(async move { engine.checkout(user, None).await });
    }

    let mut succeeded = 0;
    let mut out_of_stock = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => succeeded += 1,
            Err(CheckoutError::InsufficientStock { .. }) => out_of_stock += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(succeeded, 5);
    assert_eq!(out_of_stock, 3);
    let after = h.store.product(product.id).await.unwrap().unwrap();
    assert_eq!(after.stock, 0);
    assert_eq!(h.store.all_orders().await.unwrap().len(), 5);
}

#[tokio::test]
async fn payment_intent_quotes_without_touching_anything() {
    let h = harness();
    let user = Uuid::now_v7();
    let product = seed_product(&h.store, "Court Classic", dec!(29.99), 10).await;
    put_in_cart(&h.store, user, &product, 2).await;

    let quote = h.engine.create_payment_intent(user).await.unwrap();

    assert_eq!(quote.amount, dec!(59.98));
    assert_eq!(quote.currency, "USD");
    assert!(!quote.client_secret.is_empty());

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount_minor, 5998);
    assert_eq!(requests[0].user_id, user);

    // quoting reserves nothing and creates nothing
    assert_eq!(h.store.product(product.id).await.unwrap().unwrap().stock, 10);
    assert_eq!(h.store.cart_snapshot(user).await.unwrap().len(), 1);
    assert!(h.store.all_orders().await.unwrap().is_empty());
}

#[tokio::test]
async fn payment_intent_fails_fast_on_insufficient_stock() {
    let h = harness();
    let user = Uuid::now_v7();
    let product = seed_product(&h.store, "Scarce", dec!(10.00), 2).await;
    put_in_cart(&h.store, user, &product, 3).await;

    let result = h.engine.create_payment_intent(user).await;
    match result {
        Err(CheckoutError::InsufficientStock { title }) => assert_eq!(title, "Scarce"),
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
    assert!(h.provider.requests().is_empty());
}

#[tokio::test]
async fn payment_intent_needs_a_cart() {
    let h = harness();
    let result = h.engine.create_payment_intent(Uuid::now_v7()).await;
    assert!(matches!(result, Err(CheckoutError::CartEmpty)));
}

#[tokio::test]
async fn provider_failure_surfaces_and_creates_nothing() {
    let h = harness_with(stride_commerce::payments::MockPaymentProvider::failing(
        "card network unavailable",
    ));
    let user = Uuid::now_v7();
    let product = seed_product(&h.store, "Runner", dec!(25.00), 5).await;
    put_in_cart(&h.store, user, &product, 1).await;

    let result = h.engine.create_payment_intent(user).await;

    assert!(matches!(result, Err(CheckoutError::Provider(_))));
    assert!(h.store.all_orders().await.unwrap().is_empty());
    assert_eq!(h.store.product(product.id).await.unwrap().unwrap().stock, 5);
}
