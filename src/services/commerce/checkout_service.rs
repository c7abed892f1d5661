use crate::{
    auth::user,
    config::AppConfig,
    entities::commerce::{CartItemModel, ProductModel},
    entities::order::{self, Model as OrderModel, OrderStatus},
    errors::ServiceError,
    notifications::NotificationService,
    services::commerce::cart_service::{cart_lines, cart_total, clear_cart, find_cart},
    services::commerce::pricing_service::{
        format_amount, parse_amount, round_money, OrderTotals,
    },
    services::orders::{
        find_by_provider_order_id, insert_order, order_items, send_confirmation,
        CapturedPayment, OrderDraft, OrderWithItems, ShippingDetails,
    },
    services::payments::PayPalClient,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const ORDERS_PATH: &str = "/v2/checkout/orders";
const STATUS_COMPLETED: &str = "COMPLETED";

/// PayPal checkout: create a provider order for the cart, then capture it
/// and record the paid order.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    paypal: PayPalClient,
    notifier: Arc<dyn NotificationService>,
    config: Arc<AppConfig>,
}

/// Returned to the browser so it can redirect the buyer for approval
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PayPalOrderCreated {
    pub paypal_order_id: String,
    pub status: String,
    pub approval_url: String,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CaptureRequest {
    /// PayPal order id returned by the create step
    #[validate(length(min = 1, max = 64))]
    pub order_id: String,
    /// Overrides the address PayPal collected from the buyer
    pub shipping: Option<ShippingDetails>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CaptureResult {
    pub capture_id: String,
    /// False when an existing order for this PayPal order was updated
    pub created: bool,
    pub order: OrderWithItems,
}

// ---- provider wire types ----

#[derive(Debug, Deserialize)]
struct ProviderOrder {
    id: Option<String>,
    status: Option<String>,
    #[serde(default)]
    links: Vec<ProviderLink>,
}

#[derive(Debug, Deserialize)]
struct ProviderLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct ProviderCaptureOrder {
    payer: Option<ProviderPayer>,
    #[serde(default)]
    purchase_units: Vec<ProviderPurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct ProviderPayer {
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderPurchaseUnit {
    custom_id: Option<String>,
    shipping: Option<ProviderShipping>,
    payments: Option<ProviderPayments>,
}

#[derive(Debug, Deserialize)]
struct ProviderPayments {
    #[serde(default)]
    captures: Vec<ProviderCapture>,
}

#[derive(Debug, Deserialize)]
struct ProviderCapture {
    id: String,
    status: String,
    amount: ProviderMoney,
    custom_id: Option<String>,
    seller_receivable_breakdown: Option<ProviderBreakdown>,
}

#[derive(Debug, Deserialize)]
struct ProviderMoney {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ProviderBreakdown {
    gross_amount: Option<ProviderMoney>,
    paypal_fee: Option<ProviderMoney>,
    net_amount: Option<ProviderMoney>,
}

#[derive(Debug, Deserialize)]
struct ProviderShipping {
    name: Option<ProviderName>,
    address: Option<ProviderAddress>,
}

#[derive(Debug, Deserialize)]
struct ProviderName {
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderAddress {
    address_line_1: Option<String>,
    address_line_2: Option<String>,
    admin_area_2: Option<String>,
    admin_area_1: Option<String>,
    postal_code: Option<String>,
    country_code: Option<String>,
}

/// Figures extracted from a capture response
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCapture {
    pub capture_id: String,
    pub status: String,
    pub currency: String,
    pub amount: Decimal,
    pub custom_id: Option<String>,
    pub payer_email: Option<String>,
    pub gross_amount: Option<Decimal>,
    pub fee_amount: Option<Decimal>,
    pub net_amount: Option<Decimal>,
    pub shipping: Option<ShippingDetails>,
}

fn payment_failed(message: impl Into<String>) -> ServiceError {
    ServiceError::PaymentFailed(message.into())
}

fn breakdown_amount(
    money: Option<ProviderMoney>,
    currency: &str,
    field: &str,
) -> Result<Option<Decimal>, ServiceError> {
    let Some(money) = money else {
        return Ok(None);
    };
    if money.currency_code != currency {
        return Err(payment_failed(format!(
            "{} currency {} differs from capture currency {}",
            field, money.currency_code, currency
        )));
    }
    parse_amount(&money.value)
        .map(Some)
        .ok_or_else(|| payment_failed(format!("{} is not a number: {}", field, money.value)))
}

/// Parse `purchase_units[0].payments.captures[0]` and the payer/shipping
/// blocks of a capture response.
pub fn parse_capture(body: &str) -> Result<ParsedCapture, ServiceError> {
    let order: ProviderCaptureOrder = serde_json::from_str(body)
        .map_err(|e| payment_failed(format!("Malformed capture response: {}", e)))?;

    let unit = order
        .purchase_units
        .into_iter()
        .next()
        .ok_or_else(|| payment_failed("Capture response has no purchase units"))?;
    let capture = unit
        .payments
        .and_then(|p| p.captures.into_iter().next())
        .ok_or_else(|| payment_failed("Capture response has no captures"))?;

    let currency = capture.amount.currency_code;
    let amount = parse_amount(&capture.amount.value).ok_or_else(|| {
        payment_failed(format!("Capture amount is not a number: {}", capture.amount.value))
    })?;

    let (gross_amount, fee_amount, net_amount) = match capture.seller_receivable_breakdown {
        Some(b) => (
            breakdown_amount(b.gross_amount, &currency, "gross_amount")?,
            breakdown_amount(b.paypal_fee, &currency, "paypal_fee")?,
            breakdown_amount(b.net_amount, &currency, "net_amount")?,
        ),
        None => (None, None, None),
    };

    let shipping = unit.shipping.and_then(|s| {
        let address = s.address?;
        Some(ShippingDetails {
            full_name: s.name.and_then(|n| n.full_name).unwrap_or_default(),
            address_line1: address.address_line_1.unwrap_or_default(),
            address_line2: address.address_line_2,
            city: address.admin_area_2.unwrap_or_default(),
            state: address.admin_area_1,
            postal_code: address.postal_code.unwrap_or_default(),
            country: address.country_code.unwrap_or_default(),
            phone: None,
        })
    });

    Ok(ParsedCapture {
        capture_id: capture.id,
        status: capture.status,
        currency,
        amount,
        custom_id: capture.custom_id.or(unit.custom_id),
        payer_email: order.payer.and_then(|p| p.email_address),
        gross_amount,
        fee_amount,
        net_amount,
        shipping,
    })
}

/// Checks that do not depend on stored state
pub fn verify_capture(
    capture: &ParsedCapture,
    store_currency: &str,
    public_id: Uuid,
) -> Result<(), ServiceError> {
    if capture.status != STATUS_COMPLETED {
        return Err(payment_failed(format!(
            "Capture {} has status {}",
            capture.capture_id, capture.status
        )));
    }
    if let Some(custom_id) = capture.custom_id.as_deref() {
        if custom_id != public_id.to_string() {
            return Err(payment_failed("Capture belongs to a different customer"));
        }
    }
    if capture.currency != store_currency {
        return Err(payment_failed(format!(
            "Capture currency {} does not match store currency {}",
            capture.currency, store_currency
        )));
    }
    Ok(())
}

/// Provider request id derived from the client's idempotency key, distinct
/// per operation and per user.
pub fn provider_request_id(operation: &str, user_id: Uuid, idempotency_key: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}:{}", operation, user_id, idempotency_key));
    format!("{}-{}", operation, &hex::encode(digest)[..40])
}

fn valid_provider_order_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        paypal: PayPalClient,
        notifier: Arc<dyn NotificationService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            paypal,
            notifier,
            config,
        }
    }

    async fn load_user(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))
    }

    /// Create a PayPal order for the current cart total. Nothing is persisted.
    #[instrument(skip(self, idempotency_key))]
    pub async fn create_paypal_order(
        &self,
        user_id: Uuid,
        idempotency_key: &str,
    ) -> Result<PayPalOrderCreated, ServiceError> {
        let customer = self.load_user(user_id).await?;
        let cart = find_cart(&*self.db, user_id)
            .await?
            .ok_or_else(|| ServiceError::InvalidOperation("Cart is empty".to_string()))?;
        let lines = cart_lines(&*self.db, cart.id).await?;
        if lines.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }
        let total = cart_total(&*self.db, cart.id).await?;
        let currency = self.config.default_currency.clone();

        let mut body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": cart.id.to_string(),
                "custom_id": customer.public_id.to_string(),
                "amount": {
                    "currency_code": currency,
                    "value": format_amount(total),
                }
            }]
        });
        let paypal_cfg = self.paypal.config();
        let mut context = serde_json::Map::new();
        if let Some(brand) = &paypal_cfg.brand_name {
            context.insert("brand_name".into(), json!(brand));
        }
        if let Some(url) = &paypal_cfg.return_url {
            context.insert("return_url".into(), json!(url));
        }
        if let Some(url) = &paypal_cfg.cancel_url {
            context.insert("cancel_url".into(), json!(url));
        }
        if !context.is_empty() {
            body["application_context"] = serde_json::Value::Object(context);
        }

        let request_id = provider_request_id("create", user_id, idempotency_key);
        let response = self
            .paypal
            .post_json(ORDERS_PATH, &body, Some(&request_id))
            .await?;
        if !response.is_success() {
            warn!(status = %response.status, "PayPal rejected order creation");
            return Err(payment_failed(format!(
                "PayPal order creation failed ({}): {}",
                response.status, response.body
            )));
        }

        let created: ProviderOrder = response
            .json()
            .map_err(|e| payment_failed(format!("Malformed PayPal order response: {}", e)))?;
        let paypal_order_id = created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| payment_failed("PayPal order response has no id"))?;
        let approval_url = created
            .links
            .into_iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href)
            .ok_or_else(|| payment_failed("PayPal order response has no approval link"))?;

        info!(
            paypal_order_id = %paypal_order_id,
            cart_id = %cart.id,
            amount = %total,
            "PayPal order created"
        );

        Ok(PayPalOrderCreated {
            paypal_order_id,
            status: created.status.unwrap_or_else(|| "CREATED".to_string()),
            approval_url,
            amount: total,
            currency,
        })
    }

    /// Capture an approved PayPal order and record it as paid.
    ///
    /// The captured currency and amount must match the store currency and the
    /// expected total exactly; otherwise nothing is written.
    #[instrument(skip(self, idempotency_key, shipping))]
    pub async fn capture_paypal_order(
        &self,
        user_id: Uuid,
        paypal_order_id: &str,
        idempotency_key: &str,
        shipping: Option<ShippingDetails>,
    ) -> Result<CaptureResult, ServiceError> {
        if !valid_provider_order_id(paypal_order_id) {
            return Err(ServiceError::ValidationError(
                "order_id is not a valid PayPal order id".to_string(),
            ));
        }
        if let Some(shipping) = &shipping {
            shipping.validate()?;
        }
        let customer = self.load_user(user_id).await?;

        let request_id = provider_request_id("capture", user_id, idempotency_key);
        let response = self
            .paypal
            .post_json(
                &format!("{}/{}/capture", ORDERS_PATH, paypal_order_id),
                &json!({}),
                Some(&request_id),
            )
            .await?;
        if !response.is_success() {
            warn!(status = %response.status, paypal_order_id, "PayPal rejected capture");
            return Err(payment_failed(format!(
                "PayPal capture failed ({}): {}",
                response.status, response.body
            )));
        }

        let capture = parse_capture(&response.body)?;
        verify_capture(&capture, &self.config.default_currency, customer.public_id)?;
        let shipping = shipping.or_else(|| capture.shipping.clone());

        let (order, created) = match self
            .persist_capture(&customer, paypal_order_id, &capture, shipping.as_ref())
            .await
        {
            Err(err) if err.is_unique_violation() => {
                // A concurrent capture inserted the row first
                warn!(paypal_order_id, "concurrent capture detected, updating existing order");
                self.persist_capture(&customer, paypal_order_id, &capture, shipping.as_ref())
                    .await?
            }
            other => other?,
        };

        if created {
            send_confirmation(self.notifier.as_ref(), &order, &customer).await;
        }
        let items = order_items(&*self.db, order.id).await?;

        info!(
            order_id = %order.id,
            paypal_order_id,
            capture_id = %capture.capture_id,
            created,
            "PayPal capture recorded"
        );

        Ok(CaptureResult {
            capture_id: capture.capture_id,
            created,
            order: OrderWithItems { order, items },
        })
    }

    /// Verify the amount against stored state and upsert the order in one
    /// transaction. Returns the order and whether it was newly created.
    async fn persist_capture(
        &self,
        customer: &user::Model,
        paypal_order_id: &str,
        capture: &ParsedCapture,
        shipping: Option<&ShippingDetails>,
    ) -> Result<(OrderModel, bool), ServiceError> {
        let txn = self.db.begin().await?;
        let payment = CapturedPayment {
            paypal_order_id: paypal_order_id.to_string(),
            capture_id: capture.capture_id.clone(),
            payer_email: capture.payer_email.clone(),
            gross_amount: capture.gross_amount,
            fee_amount: capture.fee_amount,
            net_amount: capture.net_amount,
            paid_at: Utc::now(),
        };

        if let Some(existing) = find_by_provider_order_id(&txn, paypal_order_id).await? {
            if existing.user_id != customer.id {
                return Err(ServiceError::Forbidden(
                    "PayPal order belongs to another account".to_string(),
                ));
            }
            ensure_amount(existing.grand_total, capture)?;

            let status = existing.status;
            let paid_at = existing.paid_at;
            let missing_address = existing.shipping_address_line1.is_none();
            let mut active: order::ActiveModel = existing.into();
            active.paypal_capture_id = Set(Some(payment.capture_id));
            active.payer_email = Set(payment.payer_email);
            active.gross_amount = Set(payment.gross_amount);
            active.fee_amount = Set(payment.fee_amount);
            active.net_amount = Set(payment.net_amount);
            if matches!(status, OrderStatus::Pending | OrderStatus::Paid) {
                active.status = Set(OrderStatus::Paid);
            }
            if paid_at.is_none() {
                active.paid_at = Set(Some(payment.paid_at));
            }
            if let (true, Some(s)) = (missing_address, shipping) {
                active.shipping_full_name = Set(Some(s.full_name.clone()));
                active.shipping_address_line1 = Set(Some(s.address_line1.clone()));
                active.shipping_address_line2 = Set(s.address_line2.clone());
                active.shipping_city = Set(Some(s.city.clone()));
                active.shipping_state = Set(s.state.clone());
                active.shipping_postal_code = Set(Some(s.postal_code.clone()));
                active.shipping_country = Set(Some(s.country.clone()));
                active.shipping_phone = Set(s.phone.clone());
            }
            let updated = active.update(&txn).await?;
            txn.commit().await?;
            return Ok((updated, false));
        }

        let cart = find_cart(&txn, customer.id).await?;
        let lines: Vec<(CartItemModel, ProductModel)> = match &cart {
            Some(cart) => cart_lines(&txn, cart.id)
                .await?
                .into_iter()
                .filter_map(|(line, product)| product.map(|p| (line, p)))
                .collect(),
            None => Vec::new(),
        };
        let expected = match &cart {
            Some(cart) => cart_total(&txn, cart.id).await?,
            None => Decimal::ZERO,
        };
        ensure_amount(expected, capture)?;

        let totals = OrderTotals::compute(expected, Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)?;
        let (order, _) = insert_order(
            &txn,
            OrderDraft {
                user_id: customer.id,
                currency: capture.currency.clone(),
                status: OrderStatus::Paid,
                totals,
                shipping,
                payment: Some(&payment),
                lines: &lines,
            },
        )
        .await?;
        if let Some(cart) = cart {
            clear_cart(&txn, cart.id).await?;
        }
        txn.commit().await?;
        Ok((order, true))
    }
}

fn ensure_amount(expected: Decimal, capture: &ParsedCapture) -> Result<(), ServiceError> {
    let expected = round_money(expected);
    if capture.amount != expected {
        warn!(
            capture_id = %capture.capture_id,
            captured = %capture.amount,
            expected = %expected,
            "captured amount does not match expected total"
        );
        return Err(payment_failed(format!(
            "Captured amount {} {} does not match expected {} {}",
            capture.amount, capture.currency, expected, capture.currency
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn capture_body(status: &str, value: &str, fee_currency: &str) -> String {
        json!({
            "id": "5O190127TN364715T",
            "status": "COMPLETED",
            "payer": {"email_address": "buyer@example.com"},
            "purchase_units": [{
                "reference_id": "default",
                "shipping": {
                    "name": {"full_name": "Ada Lovelace"},
                    "address": {
                        "address_line_1": "12 Gem Street",
                        "admin_area_2": "London",
                        "postal_code": "N1 9GU",
                        "country_code": "GB"
                    }
                },
                "payments": {"captures": [{
                    "id": "3C679366HH908993F",
                    "status": status,
                    "amount": {"currency_code": "USD", "value": value},
                    "seller_receivable_breakdown": {
                        "gross_amount": {"currency_code": "USD", "value": value},
                        "paypal_fee": {"currency_code": fee_currency, "value": "3.00"},
                        "net_amount": {"currency_code": "USD", "value": "171.50"}
                    }
                }]}
            }]
        })
        .to_string()
    }

    #[test]
    fn parses_capture_figures() {
        let parsed = parse_capture(&capture_body("COMPLETED", "174.50", "USD")).unwrap();
        assert_eq!(parsed.capture_id, "3C679366HH908993F");
        assert_eq!(parsed.amount, dec!(174.50));
        assert_eq!(parsed.fee_amount, Some(dec!(3.00)));
        assert_eq!(parsed.net_amount, Some(dec!(171.50)));
        assert_eq!(parsed.payer_email.as_deref(), Some("buyer@example.com"));
        let shipping = parsed.shipping.unwrap();
        assert_eq!(shipping.city, "London");
        assert_eq!(shipping.country, "GB");
    }

    #[test]
    fn breakdown_currency_mismatch_is_rejected() {
        assert_matches!(
            parse_capture(&capture_body("COMPLETED", "174.50", "EUR")),
            Err(ServiceError::PaymentFailed(msg)) if msg.contains("paypal_fee")
        );
    }

    #[test]
    fn malformed_or_empty_responses_are_payment_failures() {
        assert_matches!(parse_capture("not json"), Err(ServiceError::PaymentFailed(_)));
        assert_matches!(
            parse_capture(r#"{"purchase_units": []}"#),
            Err(ServiceError::PaymentFailed(_))
        );
        assert_matches!(
            parse_capture(r#"{"purchase_units": [{"payments": {"captures": []}}]}"#),
            Err(ServiceError::PaymentFailed(_))
        );
    }

    #[test]
    fn only_completed_captures_pass() {
        let public_id = Uuid::new_v4();
        let pending = parse_capture(&capture_body("PENDING", "10.00", "USD")).unwrap();
        assert_matches!(
            verify_capture(&pending, "USD", public_id),
            Err(ServiceError::PaymentFailed(_))
        );
        let done = parse_capture(&capture_body("COMPLETED", "10.00", "USD")).unwrap();
        assert!(verify_capture(&done, "USD", public_id).is_ok());
        assert_matches!(
            verify_capture(&done, "EUR", public_id),
            Err(ServiceError::PaymentFailed(_))
        );
    }

    #[test]
    fn custom_id_must_match_the_customer() {
        let public_id = Uuid::new_v4();
        let mut capture = parse_capture(&capture_body("COMPLETED", "10.00", "USD")).unwrap();
        capture.custom_id = Some(Uuid::new_v4().to_string());
        assert_matches!(
            verify_capture(&capture, "USD", public_id),
            Err(ServiceError::PaymentFailed(_))
        );
        capture.custom_id = Some(public_id.to_string());
        assert!(verify_capture(&capture, "USD", public_id).is_ok());
    }

    #[test]
    fn amount_must_match_exactly() {
        let capture = parse_capture(&capture_body("COMPLETED", "174.50", "USD")).unwrap();
        assert!(ensure_amount(dec!(174.5), &capture).is_ok());
        assert_matches!(
            ensure_amount(dec!(174.49), &capture),
            Err(ServiceError::PaymentFailed(_))
        );
    }

    #[test]
    fn request_ids_differ_per_operation_and_user() {
        let user = Uuid::new_v4();
        let create = provider_request_id("create", user, "k1");
        let capture = provider_request_id("capture", user, "k1");
        assert_ne!(create, capture);
        assert_eq!(create, provider_request_id("create", user, "k1"));
        assert_ne!(create, provider_request_id("create", Uuid::new_v4(), "k1"));
        assert!(create.len() <= 108);
    }

    #[test]
    fn provider_order_ids_are_restricted() {
        assert!(valid_provider_order_id("5O190127TN364715T"));
        assert!(!valid_provider_order_id(""));
        assert!(!valid_provider_order_id("../../v1/oauth2/token"));
    }
}
