use crate::auth::{AuthRouterExt, AuthUser};
use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{
    errors::ApiError,
    services::commerce::cart_service::{AddToCartInput, CartView},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use uuid::Uuid;

/// Creates the router for the caller's cart
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_to_cart))
        .route("/items/:product_id", delete(remove_cart_item))
        .with_auth()
}

/// Get the caller's cart, creating it on first access
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Cart contents", body = crate::ApiResponse<CartView>),
        (status = 401, description = "Unauthorized")
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .view(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// Add item to cart; re-adding a product increases its quantity
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddToCartInput,
    responses(
        (status = 200, description = "Updated cart", body = crate::ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity or unavailable product", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<AddToCartInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let carts = &state.services.cart;
    carts
        .add_item(user.user_id, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;
    let cart = carts.view(user.user_id).await.map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// Remove a product's line from the cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product to remove")),
    responses(
        (status = 200, description = "Updated cart", body = crate::ApiResponse<CartView>),
        (status = 404, description = "Product is not in the cart", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn remove_cart_item(
    user: AuthUser,
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let carts = &state.services.cart;
    carts
        .remove_item(user.user_id, product_id)
        .await
        .map_err(map_service_error)?;
    let cart = carts.view(user.user_id).await.map_err(map_service_error)?;
    Ok(success_response(cart))
}
