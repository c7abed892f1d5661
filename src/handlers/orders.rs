use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::{AuthRouterExt, AuthUser, UserRole};
use crate::errors::{ApiError, ServiceError};
use crate::handlers::common::{created_response, map_service_error, success_response, validate_input};
use crate::services::orders::{
    CreateOrderRequest, OrderPage, OrderWithItems, UpdateOrderStatusRequest,
};
use crate::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// Admins only: list every customer's orders
    pub all: Option<bool>,
}

pub fn orders_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/:id/status", put(update_order_status))
        .with_role(UserRole::Admin.as_str());

    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .with_auth()
        .merge(admin)
}

/// Place an order from the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = crate::ApiResponse<OrderWithItems>),
        (status = 400, description = "Empty cart or invalid shipping details", body = crate::errors::ErrorResponse),
        (status = 403, description = "Tax or discount overrides require an admin", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let overrides = payload.overrides();
    if !overrides.is_empty() && !user.is_admin() {
        return Err(ApiError::ServiceError(ServiceError::Forbidden(
            "Only administrators may override tax or discount".to_string(),
        )));
    }

    let order = state
        .services
        .order
        .create_order(user.user_id, payload.shipping, overrides)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(order))
}

/// Order history, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Page of orders", body = crate::ApiResponse<OrderPage>),
        (status = 403, description = "all=true requires an admin", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = &state.services.order;
    let page = if query.all.unwrap_or(false) {
        if !user.is_admin() {
            return Err(ApiError::ServiceError(ServiceError::Forbidden(
                "Listing all orders requires an admin".to_string(),
            )));
        }
        orders.list_all_orders(query.page, query.per_page).await
    } else {
        orders
            .list_orders(user.user_id, query.page, query.per_page)
            .await
    }
    .map_err(map_service_error)?;

    Ok(success_response(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with lines", body = crate::ApiResponse<OrderWithItems>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .order
        .get_order(user.user_id, user.is_admin(), id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = crate::ApiResponse<crate::entities::OrderModel>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .order
        .update_status(id, payload.status)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}
