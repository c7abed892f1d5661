pub mod carts;
pub mod checkout;
/// Storefront API handlers
pub mod products;

// Re-export route builders
pub use carts::carts_routes;
pub use checkout::checkout_routes;
pub use products::products_routes;
