use crate::{
    auth::user,
    entities::commerce::{
        cart, cart_item, Cart, CartItem, CartItemModel, CartModel, Product, ProductModel,
    },
    errors::ServiceError,
    services::commerce::pricing_service::{lines_total, round_money},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Shopping cart service.
///
/// Every user owns at most one cart, created lazily on first access. A cart
/// holds at most one line per product; re-adding a product bumps the
/// quantity of the existing line and keeps its original price snapshot.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

/// Input for adding an item to cart
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

/// Cart line enriched with product display data
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLineView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub product_slug: Option<String>,
    pub image_url: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    /// False once the product has been withdrawn from sale
    pub available: bool,
}

/// Cart with items
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<CartLineView>,
    pub item_count: i32,
    pub subtotal: Decimal,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Return the user's cart, creating an empty one on first access
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, user_id: Uuid) -> Result<CartModel, ServiceError> {
        ensure_user(&*self.db, user_id).await?;

        if let Some(existing) = find_cart(&*self.db, user_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let created = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await;

        match created {
            Ok(cart) => {
                info!(cart_id = %cart.id, user_id = %user_id, "cart created");
                Ok(cart)
            }
            // A concurrent request created it first
            Err(err) if crate::errors::is_unique_violation(&err) => find_cart(&*self.db, user_id)
                .await?
                .ok_or_else(|| ServiceError::InternalError("cart vanished after insert".into())),
            Err(err) => Err(err.into()),
        }
    }

    /// Add a product to the user's cart or increment the existing line
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartItemModel, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        ensure_user(&*self.db, user_id).await?;
        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        if !product.is_available {
            return Err(ServiceError::InvalidOperation(format!(
                "Product {} is not available",
                product_id
            )));
        }

        let cart = self.get_or_create(user_id).await?;

        if let Some(line) = find_line(&*self.db, cart.id, product_id).await? {
            return increment_line(&*self.db, line, quantity).await;
        }

        let now = Utc::now();
        let inserted = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            price_at_add_time: Set(product.price),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await;

        match inserted {
            Ok(line) => {
                info!(cart_id = %cart.id, product_id = %product_id, quantity, "cart line added");
                Ok(line)
            }
            Err(err) if crate::errors::is_unique_violation(&err) => {
                let line = find_line(&*self.db, cart.id, product_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError("cart line vanished after insert".into())
                    })?;
                increment_line(&*self.db, line, quantity).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove the line for `product_id` from the user's cart
    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        ensure_user(&*self.db, user_id).await?;
        let cart = find_cart(&*self.db, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart for user {} not found", user_id)))?;

        let line = find_line(&*self.db, cart.id, product_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;

        CartItem::delete_by_id(line.id).exec(&*self.db).await?;
        info!(cart_id = %cart.id, product_id = %product_id, "cart line removed");
        Ok(())
    }

    /// Cart contents with product details and totals
    #[instrument(skip(self))]
    pub async fn view(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create(user_id).await?;
        let lines = cart_lines(&*self.db, cart.id).await?;

        let items: Vec<CartLineView> = lines
            .into_iter()
            .map(|(line, product)| {
                let line_total = round_money(line.line_total());
                CartLineView {
                    id: line.id,
                    product_id: line.product_id,
                    product_name: product
                        .as_ref()
                        .map(|p| p.name.clone())
                        .unwrap_or_else(|| "Unavailable product".to_string()),
                    product_slug: product.as_ref().map(|p| p.slug.clone()),
                    image_url: product.as_ref().and_then(|p| p.main_image_url.clone()),
                    quantity: line.quantity,
                    unit_price: line.price_at_add_time,
                    line_total,
                    available: product.as_ref().map(|p| p.is_available).unwrap_or(false),
                }
            })
            .collect();

        let subtotal = lines_total(items.iter().map(|i| (i.unit_price, i.quantity)));
        let item_count = items.iter().map(|i| i.quantity).sum();

        Ok(CartView {
            id: cart.id,
            user_id,
            items,
            item_count,
            subtotal,
        })
    }
}

async fn ensure_user<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<(), ServiceError> {
    user::Entity::find_by_id(user_id)
        .one(conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))
}

async fn find_line<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
) -> Result<Option<CartItemModel>, ServiceError> {
    Ok(CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .filter(cart_item::Column::ProductId.eq(product_id))
        .one(conn)
        .await?)
}

async fn increment_line<C: ConnectionTrait>(
    conn: &C,
    line: CartItemModel,
    quantity: i32,
) -> Result<CartItemModel, ServiceError> {
    let new_quantity = line.quantity.checked_add(quantity).ok_or_else(|| {
        ServiceError::ValidationError("quantity is too large".to_string())
    })?;
    let cart_id = line.cart_id;
    let product_id = line.product_id;

    let mut active: cart_item::ActiveModel = line.into();
    active.quantity = Set(new_quantity);
    active.updated_at = Set(Utc::now());
    let updated = active.update(conn).await?;

    info!(cart_id = %cart_id, product_id = %product_id, quantity = new_quantity, "cart line incremented");
    Ok(updated)
}

/// The user's cart, if one has been created
pub async fn find_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<CartModel>, ServiceError> {
    Ok(Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?)
}

/// Cart lines in insertion order, each with its product when it still exists
pub async fn cart_lines<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<Vec<(CartItemModel, Option<ProductModel>)>, ServiceError> {
    Ok(CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .order_by_asc(cart_item::Column::Id)
        .find_also_related(Product)
        .all(conn)
        .await?)
}

/// Sum of price snapshots times quantities, rounded to cents
pub async fn cart_total<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<Decimal, ServiceError> {
    let lines = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .all(conn)
        .await?;
    Ok(lines_total(
        lines.iter().map(|l| (l.price_at_add_time, l.quantity)),
    ))
}

/// Delete every line of a cart; returns the number removed
pub async fn clear_cart<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<u64, ServiceError> {
    Ok(CartItem::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?
        .rows_affected)
}
