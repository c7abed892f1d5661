//! Cart endpoints exercised through the full router.

mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn first_access_creates_an_empty_cart() {
    let app = TestApp::new().await;

    let response = app.as_customer(Method::GET, "/api/v1/cart", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    let cart = &body["data"];
    assert_eq!(cart["user_id"], app.customer.id.to_string());
    assert_eq!(cart["items"].as_array().unwrap().len(), 0);
    assert_eq!(cart["item_count"], 0);
    assert_eq!(decimal(&cart["subtotal"]), dec!(0));

    // Second read returns the same cart
    let again = response_json(app.as_customer(Method::GET, "/api/v1/cart", None).await).await;
    assert_eq!(again["data"]["id"], cart["id"]);
}

#[tokio::test]
async fn adding_the_same_product_twice_increments_quantity() {
    let app = TestApp::new().await;
    let ring = app.seed_product("Opal Ring", dec!(120.00), dec!(5.00)).await;

    let payload = json!({"product_id": ring.product.id, "quantity": 1});
    let first = app
        .as_customer(Method::POST, "/api/v1/cart/items", Some(payload))
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    let payload = json!({"product_id": ring.product.id, "quantity": 2});
    let second = app
        .as_customer(Method::POST, "/api/v1/cart/items", Some(payload))
        .await;
    assert_eq!(second.status(), StatusCode::OK);

    let body = response_json(second).await;
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1, "one line per product");
    assert_eq!(items[0]["quantity"], 3);
    assert_eq!(items[0]["product_name"], "Opal Ring");
    assert_eq!(decimal(&items[0]["line_total"]), dec!(360.00));
    assert_eq!(body["data"]["item_count"], 3);
    assert_eq!(decimal(&body["data"]["subtotal"]), dec!(360.00));
}

#[tokio::test]
async fn price_snapshot_survives_catalog_price_change() {
    let app = TestApp::new().await;
    let ring = app.seed_product("Garnet Ring", dec!(80.00), dec!(0)).await;
    app.add_to_cart(ring.product.id, 1).await;

    let update = app
        .as_admin(
            Method::PUT,
            &format!("/api/v1/products/{}", ring.product.id),
            Some(json!({"price": "95.00"})),
        )
        .await;
    assert_eq!(update.status(), StatusCode::OK);

    app.add_to_cart(ring.product.id, 1).await;
    let cart = app.state.services.cart.view(app.customer.id).await.unwrap();
    assert_eq!(cart.items[0].quantity, 2);
    assert_eq!(cart.items[0].unit_price, dec!(80.00));
    assert_eq!(cart.subtotal, dec!(160.00));
}

#[tokio::test]
async fn invalid_additions_are_rejected() {
    let app = TestApp::new().await;
    let ring = app.seed_product("Onyx Ring", dec!(60.00), dec!(0)).await;

    let zero = app
        .as_customer(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": ring.product.id, "quantity": 0})),
        )
        .await;
    assert_eq!(zero.status(), StatusCode::BAD_REQUEST);

    let missing = app
        .as_customer(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": Uuid::new_v4(), "quantity": 1})),
        )
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    app.as_admin(
        Method::PUT,
        &format!("/api/v1/products/{}", ring.product.id),
        Some(json!({"is_available": false})),
    )
    .await;
    let withdrawn = app
        .as_customer(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": ring.product.id, "quantity": 1})),
        )
        .await;
    assert_eq!(withdrawn.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn removing_items() {
    let app = TestApp::new().await;
    let ring = app.seed_product("Jade Ring", dec!(40.00), dec!(0)).await;
    let pendant = app.seed_product("Jade Pendant", dec!(55.00), dec!(0)).await;
    app.add_to_cart(ring.product.id, 2).await;
    app.add_to_cart(pendant.product.id, 1).await;

    let response = app
        .as_customer(
            Method::DELETE,
            &format!("/api/v1/cart/items/{}", ring.product.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["product_id"], pendant.product.id.to_string());

    // Removing it again is a 404
    let again = app
        .as_customer(
            Method::DELETE,
            &format!("/api/v1/cart/items/{}", ring.product.id),
            None,
        )
        .await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn carts_are_private_to_each_customer() {
    let app = TestApp::new().await;
    let ring = app.seed_product("Topaz Ring", dec!(70.00), dec!(0)).await;
    app.add_to_cart(ring.product.id, 1).await;

    let other = app.new_customer("Grace", "grace@example.com").await;
    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some(&other.access_token))
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn cart_requires_authentication() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
