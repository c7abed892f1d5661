use std::{net::SocketAddr, sync::Arc};

use http::HeaderValue;
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = jewelry_store::config::load_config()?;
    jewelry_store::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = jewelry_store::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        jewelry_store::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    if !cfg.paypal.has_credentials() {
        warn!("PayPal credentials are not configured; checkout calls will fail");
    }

    let cors_layer = build_cors_layer(&cfg)?;
    let port = cfg.port;
    let admin = cfg.admin_email.clone().zip(cfg.admin_password.clone());

    let notifier: Arc<dyn jewelry_store::notifications::NotificationService> =
        Arc::new(jewelry_store::notifications::LogNotificationService);
    let app_state = jewelry_store::AppState::new(db_arc.clone(), cfg, notifier)?;

    if let Some((email, password)) = admin {
        app_state.auth.ensure_admin(&email, &password).await?;
        info!(email = %email, "Administrator account ready");
    }

    let app = jewelry_store::app_router(app_state)
        .layer(CompressionLayer::new())
        .layer(cors_layer);

    // Bind and serve
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("jewelry-store listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Ok(pool) = Arc::try_unwrap(db_arc) {
        jewelry_store::db::close_pool(pool).await?;
    }

    Ok(())
}

fn build_cors_layer(
    cfg: &jewelry_store::config::AppConfig,
) -> Result<CorsLayer, Box<dyn std::error::Error>> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(cfg.cors_allow_credentials))
    } else if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        Ok(CorsLayer::permissive())
    } else {
        error!("Missing CORS configuration detected; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        Err("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true".into())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
