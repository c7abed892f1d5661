use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Jewelry Store API",
        version = "0.1.0",
        description = r#"
# Jewelry Store API

Backend for an online jewelry storefront.

## Features

- **Catalog**: Browse products by category, collection, price and availability
- **Cart**: One cart per customer; adding a product twice increases its quantity
- **Orders**: Place an order from the cart and review order history
- **PayPal Checkout**: Create and capture PayPal orders with replay-safe `Idempotency-Key` handling

## Authentication

Register or log in under `/auth` and send the access token on every protected call:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

Errors share one body shape:

```json
{
  "error": "Not Found",
  "message": "Not found: Product 8b0c... not found",
  "request_id": "2b7f...",
  "timestamp": "2026-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "auth", description = "Accounts and tokens"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Cart", description = "Per-customer cart"),
        (name = "Orders", description = "Order placement and history"),
        (name = "Checkout", description = "PayPal checkout")
    ),
    paths(
        // Auth
        crate::auth::register_handler,
        crate::auth::login_handler,
        crate::auth::refresh_token_handler,
        crate::auth::forgot_password_handler,
        crate::auth::reset_password_handler,
        crate::auth::me_handler,

        // Catalog
        crate::handlers::commerce::products::list_products,
        crate::handlers::commerce::products::list_categories,
        crate::handlers::commerce::products::list_collections,
        crate::handlers::commerce::products::get_product,
        crate::handlers::commerce::products::create_product,
        crate::handlers::commerce::products::update_product,
        crate::handlers::commerce::products::delete_product,

        // Cart
        crate::handlers::commerce::carts::get_cart,
        crate::handlers::commerce::carts::add_to_cart,
        crate::handlers::commerce::carts::remove_cart_item,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,

        // Checkout
        crate::handlers::commerce::checkout::create_paypal_order,
        crate::handlers::commerce::checkout::capture_paypal_order,
    ),
    components(
        schemas(
            crate::ResponseMeta,
            crate::errors::ErrorResponse,
            crate::auth::TokenPair,
            crate::auth::UserProfile,
            crate::auth::RegisterRequest,
            crate::auth::LoginCredentials,
            crate::auth::RefreshTokenRequest,
            crate::auth::ForgotPasswordRequest,
            crate::auth::ResetPasswordRequest,
            crate::entities::OrderStatus,
            crate::services::commerce::ProductPage,
            crate::services::commerce::ProductDetail,
            crate::services::commerce::CreateProductInput,
            crate::services::commerce::UpdateProductInput,
            crate::services::commerce::ProductImageInput,
            crate::services::commerce::CartView,
            crate::services::commerce::CartLineView,
            crate::services::commerce::AddToCartInput,
            crate::services::commerce::PayPalOrderCreated,
            crate::services::commerce::CaptureRequest,
            crate::services::commerce::CaptureResult,
            crate::services::orders::ShippingDetails,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::UpdateOrderStatusRequest,
            crate::services::orders::OrderWithItems,
            crate::services::orders::OrderPage,
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
