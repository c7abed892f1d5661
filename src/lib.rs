//! Jewelry storefront backend
//!
//! Catalog browsing, per-user carts, order placement and PayPal checkout
//! behind a JSON HTTP API.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::{Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::{AuthConfig, AuthService};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::middleware_helpers::IdempotencyStore;
use crate::notifications::NotificationService;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
    pub idempotency: IdempotencyStore,
    pub notifier: Arc<dyn NotificationService>,
}

impl AppState {
    /// Build every service from one pool, config and notifier.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        notifier: Arc<dyn NotificationService>,
    ) -> Result<Self, ServiceError> {
        let config = Arc::new(config);
        let auth = Arc::new(AuthService::new(
            AuthConfig::from(config.as_ref()),
            db.clone(),
            notifier.clone(),
        ));
        let services = handlers::AppServices::new(db.clone(), notifier.clone(), config.clone())?;
        let idempotency = IdempotencyStore::new(config.idempotency_ttl());

        Ok(Self {
            db,
            config,
            services,
            auth,
            idempotency,
            notifier,
        })
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

impl ApiResponse<()> {
    /// Successful response that only carries a human readable message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-err"), async {
                ApiResponse::<()>::error("oops".into())
            })
            .await;

        assert!(!response.success);
        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
    }

    #[test]
    fn message_response_has_no_data() {
        let response = ApiResponse::message("sent");
        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "sent");
        assert!(body["data"].is_null());
        // outside a request scope there is no id to report
        assert!(body["meta"].get("request_id").is_none());
    }
}

/// Routes under `/api/v1`.
pub fn api_v1_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .nest("/products", handlers::commerce::products_routes())
        .nest("/cart", handlers::commerce::carts_routes())
        .nest("/orders", handlers::orders::orders_routes())
        .nest("/checkout", handlers::commerce::checkout_routes(state))
}

/// The full application: auth, API v1, Swagger UI and the shared layers.
///
/// CORS is left to the binary since it depends on deployment config.
pub fn app_router(state: AppState) -> Router {
    let auth_service = state.auth.clone();

    Router::new()
        .route("/", get(|| async { "jewelry-store up" }))
        .nest("/api/v1", api_v1_routes(&state))
        .nest(
            "/auth",
            auth::auth_routes().with_state(auth_service.clone()),
        )
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        // Inject AuthService into request extensions for auth middleware
        .layer(middleware::from_fn_with_state(
            auth_service,
            inject_auth_service,
        ))
        .layer(middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

async fn inject_auth_service(
    State(auth): State<Arc<AuthService>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    request.extensions_mut().insert(auth);
    next.run(request).await
}

async fn api_status(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "jewelry-store",
        "environment": state.config.environment,
        "currency": state.config.default_currency,
        "paypal_configured": state.config.paypal.has_credentials(),
        "timestamp": Utc::now().to_rfc3339(),
    });

    Json(ApiResponse::success(status_data))
}

async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    Json(ApiResponse::success(json!({
        "status": db_status,
        "checks": { "database": db_status },
        "timestamp": Utc::now().to_rfc3339(),
    })))
}
