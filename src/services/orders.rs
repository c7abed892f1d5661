use crate::{
    auth::user,
    config::AppConfig,
    entities::{
        commerce::{CartItemModel, ProductModel},
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
    },
    errors::ServiceError,
    notifications::{Notification, NotificationService, OrderConfirmation},
    services::commerce::cart_service::{cart_lines, clear_cart, find_cart},
    services::commerce::pricing_service::{line_total, lines_total, max_shipping, OrderTotals},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Destination address captured on an order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingDetails {
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    #[validate(length(min = 1, max = 255))]
    pub address_line1: String,
    #[validate(length(max = 255))]
    pub address_line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(max = 100))]
    pub state: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    /// ISO 3166-1 alpha-2
    #[validate(length(min = 2, max = 2))]
    pub country: String,
    #[validate(length(max = 40))]
    pub phone: Option<String>,
}

/// Externally computed tax and discount; both default to zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PricingOverrides {
    pub tax: Option<Decimal>,
    pub discount: Option<Decimal>,
}

impl PricingOverrides {
    pub fn is_empty(&self) -> bool {
        self.tax.is_none() && self.discount.is_none()
    }
}

/// Request body for placing an order from the current cart
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate]
    pub shipping: ShippingDetails,
    pub tax: Option<Decimal>,
    pub discount: Option<Decimal>,
}

impl CreateOrderRequest {
    pub fn overrides(&self) -> PricingOverrides {
        PricingOverrides {
            tax: self.tax,
            discount: self.discount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Order together with its line snapshots
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderPage {
    pub items: Vec<OrderModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

/// Provider figures recorded on a paid order
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPayment {
    pub paypal_order_id: String,
    pub capture_id: String,
    pub payer_email: Option<String>,
    pub gross_amount: Option<Decimal>,
    pub fee_amount: Option<Decimal>,
    pub net_amount: Option<Decimal>,
    pub paid_at: DateTime<Utc>,
}

/// Everything needed to persist a new order and its lines
pub(crate) struct OrderDraft<'a> {
    pub user_id: Uuid,
    pub currency: String,
    pub status: OrderStatus,
    pub totals: OrderTotals,
    pub shipping: Option<&'a ShippingDetails>,
    pub payment: Option<&'a CapturedPayment>,
    pub lines: &'a [(CartItemModel, ProductModel)],
}

/// Service for placing and reading orders
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    notifier: Arc<dyn NotificationService>,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        notifier: Arc<dyn NotificationService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            notifier,
            config,
        }
    }

    /// Turn the user's cart into a pending order.
    ///
    /// The cart read, the order insert and the cart clearing share one
    /// transaction; on any error nothing is persisted.
    #[instrument(skip(self, shipping))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        shipping: ShippingDetails,
        overrides: PricingOverrides,
    ) -> Result<OrderWithItems, ServiceError> {
        shipping.validate()?;

        let txn = self.db.begin().await?;

        let customer = user::Entity::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;
        let cart = find_cart(&txn, user_id)
            .await?
            .ok_or_else(|| ServiceError::InvalidOperation("Cart is empty".to_string()))?;
        let lines = purchasable_lines(cart_lines(&txn, cart.id).await?)?;

        let subtotal = lines_total(lines.iter().map(|(l, _)| (l.price_at_add_time, l.quantity)));
        let shipping_total = max_shipping(lines.iter().map(|(_, p)| p.shipping_price));
        let totals = OrderTotals::compute(
            subtotal,
            shipping_total,
            overrides.tax.unwrap_or(Decimal::ZERO),
            overrides.discount.unwrap_or(Decimal::ZERO),
        )?;

        // Clearing first detects a concurrent checkout of the same cart
        let removed = clear_cart(&txn, cart.id).await?;
        if removed != lines.len() as u64 {
            return Err(ServiceError::Conflict(
                "Cart changed while the order was being placed".to_string(),
            ));
        }

        let (order, items) = insert_order(
            &txn,
            OrderDraft {
                user_id,
                currency: self.config.default_currency.clone(),
                status: OrderStatus::Pending,
                totals,
                shipping: Some(&shipping),
                payment: None,
                lines: &lines,
            },
        )
        .await?;

        txn.commit().await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            grand_total = %order.grand_total,
            lines = items.len(),
            "order created"
        );

        send_confirmation(self.notifier.as_ref(), &order, &customer).await;
        Ok(OrderWithItems { order, items })
    }

    /// The user's orders, newest first
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: Uuid,
        page: Option<u64>,
        per_page: Option<u64>,
    ) -> Result<OrderPage, ServiceError> {
        self.paginate(Some(user_id), page, per_page).await
    }

    /// Every order in the store, newest first
    #[instrument(skip(self))]
    pub async fn list_all_orders(
        &self,
        page: Option<u64>,
        per_page: Option<u64>,
    ) -> Result<OrderPage, ServiceError> {
        self.paginate(None, page, per_page).await
    }

    async fn paginate(
        &self,
        user_id: Option<Uuid>,
        page: Option<u64>,
        per_page: Option<u64>,
    ) -> Result<OrderPage, ServiceError> {
        let per_page = self.config.clamp_page_size(per_page);
        let page = page.unwrap_or(1).max(1);

        let mut query = OrderEntity::find();
        if let Some(user_id) = user_id {
            query = query.filter(order::Column::UserId.eq(user_id));
        }
        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(OrderPage {
            items,
            total,
            page,
            per_page,
            total_pages: total.div_ceil(per_page),
        })
    }

    /// An order with its lines. Orders of other users are reported as
    /// missing unless `is_admin` is set.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        user_id: Uuid,
        is_admin: bool,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| is_admin || o.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = order_items(&*self.db, order.id).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Move an order along its lifecycle
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let previous = order.status;
        if !previous.can_transition_to(status) {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot move order from {} to {}",
                previous, status
            )));
        }

        let paid_at = order.paid_at;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(status);
        if status == OrderStatus::Paid && paid_at.is_none() {
            active.paid_at = Set(Some(Utc::now()));
        }
        let updated = active.update(&*self.db).await?;

        info!(order_id = %order_id, from = %previous, to = %status, "order status updated");
        Ok(updated)
    }

    pub async fn find_by_provider_order_id(
        &self,
        paypal_order_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        find_by_provider_order_id(&*self.db, paypal_order_id).await
    }
}

/// Cart lines paired with their products; empty carts, deleted products and
/// withdrawn products cannot be ordered.
pub(crate) fn purchasable_lines(
    lines: Vec<(CartItemModel, Option<ProductModel>)>,
) -> Result<Vec<(CartItemModel, ProductModel)>, ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
    }
    lines
        .into_iter()
        .map(|(line, product)| match product {
            Some(p) if p.is_available => Ok((line, p)),
            Some(p) => Err(ServiceError::InvalidOperation(format!(
                "{} is no longer available",
                p.name
            ))),
            None => Err(ServiceError::InvalidOperation(format!(
                "Product {} no longer exists",
                line.product_id
            ))),
        })
        .collect()
}

/// `ORD-YYYYMMDD-XXXXXXXX`
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

pub(crate) async fn insert_order<C: ConnectionTrait>(
    conn: &C,
    draft: OrderDraft<'_>,
) -> Result<(OrderModel, Vec<OrderItemModel>), sea_orm::DbErr> {
    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let shipping = draft.shipping;
    let payment = draft.payment;

    let order = order::ActiveModel {
        id: Set(order_id),
        order_number: Set(generate_order_number(now)),
        user_id: Set(draft.user_id),
        status: Set(draft.status),
        currency: Set(draft.currency),
        subtotal: Set(draft.totals.subtotal),
        shipping_total: Set(draft.totals.shipping_total),
        tax_total: Set(draft.totals.tax_total),
        discount_total: Set(draft.totals.discount_total),
        grand_total: Set(draft.totals.grand_total),
        shipping_full_name: Set(shipping.map(|s| s.full_name.clone())),
        shipping_address_line1: Set(shipping.map(|s| s.address_line1.clone())),
        shipping_address_line2: Set(shipping.and_then(|s| s.address_line2.clone())),
        shipping_city: Set(shipping.map(|s| s.city.clone())),
        shipping_state: Set(shipping.and_then(|s| s.state.clone())),
        shipping_postal_code: Set(shipping.map(|s| s.postal_code.clone())),
        shipping_country: Set(shipping.map(|s| s.country.clone())),
        shipping_phone: Set(shipping.and_then(|s| s.phone.clone())),
        paypal_order_id: Set(payment.map(|p| p.paypal_order_id.clone())),
        paypal_capture_id: Set(payment.map(|p| p.capture_id.clone())),
        payer_email: Set(payment.and_then(|p| p.payer_email.clone())),
        gross_amount: Set(payment.and_then(|p| p.gross_amount)),
        fee_amount: Set(payment.and_then(|p| p.fee_amount)),
        net_amount: Set(payment.and_then(|p| p.net_amount)),
        paid_at: Set(payment.map(|p| p.paid_at)),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    let mut items = Vec::with_capacity(draft.lines.len());
    for (line, product) in draft.lines {
        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            product_name: Set(product.name.clone()),
            unit_price: Set(line.price_at_add_time),
            quantity: Set(line.quantity),
            line_total: Set(line_total(line.price_at_add_time, line.quantity)),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;
        items.push(item);
    }

    Ok((order, items))
}

pub(crate) async fn order_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<OrderItemModel>, ServiceError> {
    Ok(OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::CreatedAt)
        .order_by_asc(order_item::Column::ProductName)
        .all(conn)
        .await?)
}

pub(crate) async fn find_by_provider_order_id<C: ConnectionTrait>(
    conn: &C,
    paypal_order_id: &str,
) -> Result<Option<OrderModel>, ServiceError> {
    Ok(OrderEntity::find()
        .filter(order::Column::PaypalOrderId.eq(paypal_order_id))
        .one(conn)
        .await?)
}

/// Fire-and-forget confirmation; failures are logged only.
pub(crate) async fn send_confirmation(
    notifier: &dyn NotificationService,
    order: &OrderModel,
    customer: &user::Model,
) {
    let confirmation = OrderConfirmation {
        order_id: order.id,
        order_number: order.order_number.clone(),
        user_id: customer.id,
        email: customer.email.clone(),
        customer_name: customer.name.clone(),
        grand_total: order.grand_total,
        currency: order.currency.clone(),
        placed_at: order.created_at,
    };
    if let Err(err) = notifier
        .send(Notification::OrderConfirmation(confirmation))
        .await
    {
        warn!(order_id = %order.id, error = %err, "order confirmation could not be sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{MockNotificationService, NotificationError};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn product(available: bool) -> ProductModel {
        ProductModel {
            id: Uuid::new_v4(),
            name: "Pearl Drop Earrings".into(),
            slug: "pearl-drop-earrings".into(),
            description: String::new(),
            category: "earrings".into(),
            collection: None,
            material: Some("pearl".into()),
            price: dec!(80),
            shipping_price: dec!(5),
            is_available: available,
            stock_count: 3,
            main_image_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn line(product_id: Uuid) -> CartItemModel {
        CartItemModel {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id,
            quantity: 1,
            price_at_add_time: dec!(80),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn customer() -> user::Model {
        user::Model {
            id: Uuid::new_v4(),
            public_id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: String::new(),
            role: user::UserRole::Customer,
            active: true,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn order_for(customer: &user::Model) -> OrderModel {
        OrderModel {
            id: Uuid::new_v4(),
            order_number: generate_order_number(Utc::now()),
            user_id: customer.id,
            status: OrderStatus::Pending,
            currency: "USD".into(),
            subtotal: dec!(80),
            shipping_total: dec!(5),
            tax_total: dec!(0),
            discount_total: dec!(0),
            grand_total: dec!(85),
            shipping_full_name: None,
            shipping_address_line1: None,
            shipping_address_line2: None,
            shipping_city: None,
            shipping_state: None,
            shipping_postal_code: None,
            shipping_country: None,
            shipping_phone: None,
            paypal_order_id: None,
            paypal_capture_id: None,
            payer_email: None,
            gross_amount: None,
            fee_amount: None,
            net_amount: None,
            paid_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_cart_cannot_be_ordered() {
        assert_matches!(
            purchasable_lines(vec![]),
            Err(ServiceError::InvalidOperation(_))
        );
    }

    #[test]
    fn withdrawn_or_deleted_products_block_the_order() {
        let p = product(false);
        assert_matches!(
            purchasable_lines(vec![(line(p.id), Some(p))]),
            Err(ServiceError::InvalidOperation(msg)) if msg.contains("no longer available")
        );
        assert_matches!(
            purchasable_lines(vec![(line(Uuid::new_v4()), None)]),
            Err(ServiceError::InvalidOperation(msg)) if msg.contains("no longer exists")
        );
    }

    #[test]
    fn order_numbers_are_dated_and_unique() {
        let now = Utc::now();
        let a = generate_order_number(now);
        let b = generate_order_number(now);
        assert!(a.starts_with(&format!("ORD-{}-", now.format("%Y%m%d"))));
        assert_eq!(a.len(), "ORD-YYYYMMDD-XXXXXXXX".len());
        assert_ne!(a, b);
    }

    #[test]
    fn shipping_details_are_validated() {
        let mut shipping = ShippingDetails {
            full_name: "Ada Lovelace".into(),
            address_line1: "12 Gem Street".into(),
            city: "London".into(),
            postal_code: "N1 9GU".into(),
            country: "GB".into(),
            ..Default::default()
        };
        assert!(shipping.validate().is_ok());
        shipping.country = "GBR".into();
        assert!(shipping.validate().is_err());
    }

    #[tokio::test]
    async fn notification_failure_is_swallowed() {
        let mut notifier = MockNotificationService::new();
        notifier
            .expect_send()
            .times(1)
            .returning(|_| Err(NotificationError::Delivery("smtp down".into())));

        let customer = customer();
        send_confirmation(&notifier, &order_for(&customer), &customer).await;
    }

    #[tokio::test]
    async fn confirmation_carries_order_figures() {
        let customer = customer();
        let order = order_for(&customer);
        let expected_number = order.order_number.clone();

        let mut notifier = MockNotificationService::new();
        notifier
            .expect_send()
            .withf(move |n| {
                matches!(n, Notification::OrderConfirmation(c)
                    if c.order_number == expected_number && c.grand_total == dec!(85))
            })
            .times(1)
            .returning(|_| Ok(()));

        send_confirmation(&notifier, &order, &customer).await;
    }
}
