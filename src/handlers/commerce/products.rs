use crate::auth::{AuthRouterExt, AuthUser, UserRole};
use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
};
use crate::{
    errors::ApiError,
    services::commerce::catalog_service::{
        CreateProductInput, ProductDetail, ProductFilter, ProductPage, UpdateProductInput,
    },
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use uuid::Uuid;

/// Creates the router for product endpoints
pub fn products_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/", post(create_product))
        .route("/:id", put(update_product).delete(delete_product))
        .with_role(UserRole::Admin.as_str());

    Router::new()
        .route("/", get(list_products))
        .route("/categories", get(list_categories))
        .route("/collections", get(list_collections))
        .route("/:id", get(get_product))
        .merge(admin)
}

/// Browse the catalog
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductFilter),
    responses(
        (status = 200, description = "Page of products", body = crate::ApiResponse<ProductPage>)
    ),
    tag = "Products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .services
        .catalog
        .list_products(filter)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/categories",
    responses((status = 200, description = "Distinct categories", body = crate::ApiResponse<Vec<String>>)),
    tag = "Products"
)]
pub async fn list_categories(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let categories = state
        .services
        .catalog
        .list_categories()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(categories))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/collections",
    responses((status = 200, description = "Distinct collections", body = crate::ApiResponse<Vec<String>>)),
    tag = "Products"
)]
pub async fn list_collections(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let collections = state
        .services
        .catalog
        .list_collections()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(collections))
}

/// Product with its gallery
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product found", body = crate::ApiResponse<ProductDetail>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .get_product(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(product))
}

/// Create a new product
#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductInput,
    responses(
        (status = 201, description = "Product created", body = crate::ApiResponse<ProductDetail>),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Slug already exists", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Products"
)]
pub async fn create_product(
    _user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let product = state
        .services
        .catalog
        .create_product(payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(product))
}

#[utoipa::path(
    put,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = UpdateProductInput,
    responses(
        (status = 200, description = "Product updated", body = crate::ApiResponse<ProductDetail>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Products"
)]
pub async fn update_product(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let product = state
        .services
        .catalog
        .update_product(id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(product))
}

#[utoipa::path(
    delete,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 204, description = "Product deleted"),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Products"
)]
pub async fn delete_product(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .catalog
        .delete_product(id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}
