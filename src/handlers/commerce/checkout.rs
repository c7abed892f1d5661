use crate::auth::{AuthRouterExt, AuthUser};
use crate::handlers::common::{created_response, map_service_error, success_response, validate_input};
use crate::middleware_helpers::{idempotency_middleware, IdempotencyKey};
use crate::{
    errors::ApiError,
    services::commerce::checkout_service::{CaptureRequest, CaptureResult, PayPalOrderCreated},
    AppState,
};
use axum::{
    extract::{Json, State},
    middleware,
    response::IntoResponse,
    routing::post,
    Router,
};

/// Creates the router for PayPal checkout. Both routes require an
/// `Idempotency-Key`; the idempotency layer runs inside authentication so
/// stored responses are scoped to the caller.
pub fn checkout_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/paypal/order", post(create_paypal_order))
        .route("/paypal/capture", post(capture_paypal_order))
        .layer(middleware::from_fn_with_state(
            state.idempotency.clone(),
            idempotency_middleware,
        ))
        .with_auth()
}

/// Create a PayPal order for the current cart total
#[utoipa::path(
    post,
    path = "/api/v1/checkout/paypal/order",
    params(("Idempotency-Key" = String, Header, description = "Client-generated key, forwarded to PayPal")),
    responses(
        (status = 201, description = "PayPal order created", body = crate::ApiResponse<PayPalOrderCreated>),
        (status = 400, description = "Missing Idempotency-Key or empty cart", body = crate::errors::ErrorResponse),
        (status = 402, description = "PayPal rejected the order", body = crate::errors::ErrorResponse),
        (status = 502, description = "PayPal unreachable", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn create_paypal_order(
    user: AuthUser,
    key: IdempotencyKey,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .services
        .checkout
        .create_paypal_order(user.user_id, key.as_str())
        .await
        .map_err(map_service_error)?;
    Ok(created_response(created))
}

/// Capture an approved PayPal order and record the paid order
#[utoipa::path(
    post,
    path = "/api/v1/checkout/paypal/capture",
    params(("Idempotency-Key" = String, Header, description = "Client-generated key, forwarded to PayPal")),
    request_body = CaptureRequest,
    responses(
        (status = 200, description = "Payment captured", body = crate::ApiResponse<CaptureResult>),
        (status = 400, description = "Missing Idempotency-Key or invalid body", body = crate::errors::ErrorResponse),
        (status = 402, description = "Capture rejected or amount mismatch", body = crate::errors::ErrorResponse),
        (status = 502, description = "PayPal unreachable", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn capture_paypal_order(
    user: AuthUser,
    key: IdempotencyKey,
    State(state): State<AppState>,
    Json(payload): Json<CaptureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let result = state
        .services
        .checkout
        .capture_paypal_order(
            user.user_id,
            payload.order_id.trim(),
            key.as_str(),
            payload.shipping,
        )
        .await
        .map_err(map_service_error)?;
    Ok(success_response(result))
}
