/// Payment provider integrations
pub mod paypal;

pub use paypal::{PayPalClient, PayPalResponse, PAYPAL_REQUEST_ID_HEADER};
