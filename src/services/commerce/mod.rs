/// Storefront services: catalog, cart, pricing and PayPal checkout
pub mod cart_service;
pub mod catalog_service;
pub mod checkout_service;
pub mod pricing_service;

// Re-export services for convenience
pub use cart_service::{AddToCartInput, CartLineView, CartService, CartView};
pub use catalog_service::{
    CatalogService, CreateProductInput, ProductDetail, ProductFilter, ProductImageInput,
    ProductPage, UpdateProductInput,
};
pub use checkout_service::{CaptureRequest, CaptureResult, CheckoutService, PayPalOrderCreated};
