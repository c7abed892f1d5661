#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use jewelry_store::{
    app_router,
    auth::{LoginCredentials, RegisterRequest},
    config::AppConfig,
    db,
    notifications::InMemoryNotificationService,
    services::commerce::{CreateProductInput, ProductDetail, ProductImageInput},
    AppState,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const TEST_SECRET: &str =
    "q8Vn2Lr7Xc4Tz1Wb6Hy3Ks9Pd0Mf5Ga8Je2Ru7Io4Ql1Zx6Cv3Bn9Mh0Tg5Yf8Dw2Es";
pub const CUSTOMER_PASSWORD: &str = "Sparkle-Gem-2024";

/// A signed-in account used by the tests
#[derive(Clone, Debug)]
pub struct TestUser {
    pub id: Uuid,
    pub public_id: Uuid,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
}

/// Full application on a throwaway SQLite file with PayPal mocked by wiremock.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub notifier: Arc<InMemoryNotificationService>,
    pub paypal: MockServer,
    pub customer: TestUser,
    pub admin: TestUser,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let paypal = MockServer::start().await;

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display()),
            TEST_SECRET.to_string(),
            3600,
            86_400,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.paypal.base_url = paypal.uri();
        cfg.paypal.client_id = "test-client".to_string();
        cfg.paypal.client_secret = "test-secret".to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let notifier = Arc::new(InMemoryNotificationService::new());
        let state = AppState::new(Arc::new(pool), cfg, notifier.clone())
            .expect("application state for tests");
        let router = app_router(state.clone());

        let customer = sign_up(&state, "Ada Customer", "ada@example.com").await;

        state
            .auth
            .ensure_admin("admin@example.com", CUSTOMER_PASSWORD)
            .await
            .expect("bootstrap admin");
        let admin = sign_in(&state, "admin@example.com").await;

        Self {
            router,
            state,
            notifier,
            paypal,
            customer,
            admin,
            _dir: dir,
        }
    }

    /// Register and sign in an additional shopper.
    pub async fn new_customer(&self, name: &str, email: &str) -> TestUser {
        sign_up(&self.state, name, email).await
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        self.request_with_headers(method, uri, body, token, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Authenticated as the default customer.
    pub async fn as_customer(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request(method, uri, body, Some(&self.customer.access_token))
            .await
    }

    pub async fn as_admin(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request(method, uri, body, Some(&self.admin.access_token))
            .await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, shipping: Decimal) -> ProductDetail {
        self.state
            .services
            .catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                slug: None,
                description: format!("{} seeded for integration tests", name),
                category: "rings".to_string(),
                collection: Some("Test".to_string()),
                material: Some("silver".to_string()),
                price,
                shipping_price: shipping,
                is_available: true,
                stock_count: 5,
                main_image_url: None,
                images: vec![ProductImageInput {
                    url: format!("https://cdn.example.com/{}.jpg", name.to_lowercase()),
                    alt_text: None,
                }],
            })
            .await
            .expect("seed product for tests")
    }

    /// Put `quantity` of `product_id` into the default customer's cart.
    pub async fn add_to_cart(&self, product_id: Uuid, quantity: i32) {
        self.state
            .services
            .cart
            .add_item(self.customer.id, product_id, quantity)
            .await
            .expect("add item to cart");
    }

    /// Stub the OAuth2 token endpoint.
    pub async fn mount_paypal_token(&self) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A21AAtest",
                "token_type": "Bearer",
                "expires_in": 32400
            })))
            .mount(&self.paypal)
            .await;
    }
}

async fn sign_up(state: &AppState, name: &str, email: &str) -> TestUser {
    state
        .auth
        .register(RegisterRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: CUSTOMER_PASSWORD.to_string(),
        })
        .await
        .expect("register test user");
    sign_in(state, email).await
}

async fn sign_in(state: &AppState, email: &str) -> TestUser {
    let tokens = state
        .auth
        .login(LoginCredentials {
            email: email.to_string(),
            password: CUSTOMER_PASSWORD.to_string(),
        })
        .await
        .expect("login test user");
    let account = state
        .auth
        .authenticate(&tokens.access_token)
        .expect("fresh token authenticates");
    let stored = state
        .auth
        .get_user(account.user_id)
        .await
        .expect("load test user");

    TestUser {
        id: stored.id,
        public_id: stored.public_id,
        email: stored.email,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Monetary fields may come back as strings or numbers depending on backend.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("expected a decimal, got {}", other),
    }
}

/// PayPal capture response body for `amount` captured under `custom_id`.
pub fn capture_response(capture_id: &str, amount: &str, currency: &str, custom_id: Uuid) -> Value {
    json!({
        "id": "5O190127TN364715T",
        "status": "COMPLETED",
        "payer": {"email_address": "buyer@example.com"},
        "purchase_units": [{
            "reference_id": "default",
            "shipping": {
                "name": {"full_name": "Ada Customer"},
                "address": {
                    "address_line_1": "1 Main St",
                    "admin_area_2": "San Jose",
                    "admin_area_1": "CA",
                    "postal_code": "95131",
                    "country_code": "US"
                }
            },
            "payments": {"captures": [{
                "id": capture_id,
                "status": "COMPLETED",
                "custom_id": custom_id.to_string(),
                "amount": {"currency_code": currency, "value": amount},
                "seller_receivable_breakdown": {
                    "gross_amount": {"currency_code": currency, "value": amount},
                    "paypal_fee": {"currency_code": currency, "value": "1.00"}
                }
            }]}
        }]
    })
}

pub fn shipping_json() -> Value {
    json!({
        "full_name": "Ada Customer",
        "address_line1": "12 Gem Street",
        "city": "Portland",
        "state": "OR",
        "postal_code": "97201",
        "country": "US"
    })
}
