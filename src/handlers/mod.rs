pub mod commerce;
pub mod common;
pub mod orders;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    notifications::NotificationService,
    services::{
        commerce::{CartService, CatalogService, CheckoutService},
        orders::OrderService,
        payments::PayPalClient,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub cart: Arc<CartService>,
    pub order: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
}

impl AppServices {
    /// Wire every service against the shared pool, notifier and config.
    pub fn new(
        db_pool: Arc<DbPool>,
        notifier: Arc<dyn NotificationService>,
        config: Arc<AppConfig>,
    ) -> Result<Self, ServiceError> {
        let paypal = PayPalClient::new(config.paypal.clone())?;

        let catalog = Arc::new(CatalogService::new(db_pool.clone(), config.clone()));
        let cart = Arc::new(CartService::new(db_pool.clone()));
        let order = Arc::new(OrderService::new(
            db_pool.clone(),
            notifier.clone(),
            config.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(db_pool, paypal, notifier, config));

        Ok(Self {
            catalog,
            cart,
            order,
            checkout,
        })
    }
}
