// Storefront services
pub mod commerce;
pub mod orders;

// External providers
pub mod payments;
