//! Catalog browsing and admin product management over HTTP.

mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

fn new_product() -> serde_json::Value {
    json!({
        "name": "Moonstone Drop Earrings",
        "description": "Rainbow moonstone on silver hooks",
        "category": "earrings",
        "collection": "Celestial",
        "material": "sterling silver",
        "price": "145.00",
        "shipping_price": "6.50",
        "stock_count": 3,
        "images": [
            {"url": "https://cdn.example.com/moonstone-1.jpg", "alt_text": "front"},
            {"url": "https://cdn.example.com/moonstone-2.jpg"}
        ]
    })
}

#[tokio::test]
async fn admin_creates_product_with_ordered_gallery() {
    let app = TestApp::new().await;

    let response = app
        .as_admin(Method::POST, "/api/v1/products", Some(new_product()))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    let product = &body["data"];
    assert_eq!(product["slug"], "moonstone-drop-earrings");
    assert_eq!(decimal(&product["price"]), dec!(145.00));
    assert_eq!(product["is_available"], true);
    let images = product["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0]["url"], "https://cdn.example.com/moonstone-1.jpg");
    assert_eq!(images[0]["sort_order"], 0);
    assert_eq!(images[1]["sort_order"], 1);

    // Public detail view returns the same gallery
    let id = product["id"].as_str().unwrap();
    let detail = app
        .request(Method::GET, &format!("/api/v1/products/{}", id), None, None)
        .await;
    assert_eq!(detail.status(), StatusCode::OK);
    let detail = response_json(detail).await;
    assert_eq!(detail["data"]["images"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn duplicate_slug_is_a_conflict() {
    let app = TestApp::new().await;
    let first = app
        .as_admin(Method::POST, "/api/v1/products", Some(new_product()))
        .await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .as_admin(Method::POST, "/api/v1/products", Some(new_product()))
        .await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn product_management_requires_admin() {
    let app = TestApp::new().await;

    let anonymous = app
        .request(Method::POST, "/api/v1/products", Some(new_product()), None)
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let customer = app
        .as_customer(Method::POST, "/api/v1/products", Some(new_product()))
        .await;
    assert_eq!(customer.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn negative_price_is_rejected() {
    let app = TestApp::new().await;
    let mut payload = new_product();
    payload["price"] = json!("-1.00");

    let response = app
        .as_admin(Method::POST, "/api/v1/products", Some(payload))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn browse_filters_by_category_and_search() {
    let app = TestApp::new().await;
    app.seed_product("Silver Band", dec!(50), dec!(0)).await;
    app.seed_product("Gold Band", dec!(250), dec!(0)).await;
    app.as_admin(Method::POST, "/api/v1/products", Some(new_product()))
        .await;

    let rings = response_json(
        app.request(Method::GET, "/api/v1/products?category=rings", None, None)
            .await,
    )
    .await;
    assert_eq!(rings["data"]["total"], 2);

    let gold = response_json(
        app.request(Method::GET, "/api/v1/products?search=Gold", None, None)
            .await,
    )
    .await;
    let items = gold["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], "Gold Band");

    let paged = response_json(
        app.request(Method::GET, "/api/v1/products?per_page=2&page=2", None, None)
            .await,
    )
    .await;
    assert_eq!(paged["data"]["total"], 3);
    assert_eq!(paged["data"]["total_pages"], 2);
    assert_eq!(paged["data"]["items"].as_array().unwrap().len(), 1);

    let categories = response_json(
        app.request(Method::GET, "/api/v1/products/categories", None, None)
            .await,
    )
    .await;
    assert_eq!(categories["data"], json!(["earrings", "rings"]));
}

#[tokio::test]
async fn updating_images_replaces_the_gallery() {
    let app = TestApp::new().await;
    let ring = app.seed_product("Pearl Ring", dec!(90), dec!(0)).await;

    let response = app
        .as_admin(
            Method::PUT,
            &format!("/api/v1/products/{}", ring.product.id),
            Some(json!({
                "images": [
                    {"url": "https://cdn.example.com/a.jpg"},
                    {"url": "https://cdn.example.com/b.jpg"},
                    {"url": "https://cdn.example.com/c.jpg"}
                ]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let detail = app.state.services.catalog.get_product(ring.product.id).await.unwrap();
    let urls: Vec<_> = detail.images.iter().map(|i| i.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://cdn.example.com/a.jpg",
            "https://cdn.example.com/b.jpg",
            "https://cdn.example.com/c.jpg"
        ]
    );
}

#[tokio::test]
async fn deleting_a_product_removes_it_from_carts() {
    let app = TestApp::new().await;
    let ring = app.seed_product("Ruby Ring", dec!(300), dec!(0)).await;
    app.add_to_cart(ring.product.id, 1).await;

    let response = app
        .as_admin(
            Method::DELETE,
            &format!("/api/v1/products/{}", ring.product.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let missing = app
        .request(
            Method::GET,
            &format!("/api/v1/products/{}", ring.product.id),
            None,
            None,
        )
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let cart = app.state.services.cart.view(app.customer.id).await.unwrap();
    assert!(cart.items.is_empty());
}

#[tokio::test]
async fn unknown_product_is_not_found() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/products/{}", Uuid::new_v4()),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Not Found");
}

#[tokio::test]
async fn health_and_status_are_public() {
    let app = TestApp::new().await;

    let health = app.request(Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(health.status(), StatusCode::OK);
    let body = response_json(health).await;
    assert_eq!(body["data"]["checks"]["database"], "healthy");

    let status = app.request(Method::GET, "/api/v1/status", None, None).await;
    let body = response_json(status).await;
    assert_eq!(body["data"]["currency"], "USD");
    assert!(body["meta"]["request_id"].as_str().is_some());
}
