use crate::{
    config::AppConfig,
    entities::commerce::{
        cart_item, product, product_image, CartItem, Product, ProductImage, ProductImageModel,
        ProductModel,
    },
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Catalog of jewelry products and their image galleries
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
}

/// Query filters for browsing the catalog
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub collection: Option<String>,
    /// Substring match on the product name
    pub search: Option<String>,
    pub available_only: Option<bool>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// One page of products
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductPage {
    pub items: Vec<ProductModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

/// Product with its gallery ordered by `sort_order`
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: ProductModel,
    pub images: Vec<ProductImageModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ProductImageInput {
    #[validate(length(min = 1, max = 2048))]
    pub url: String,
    pub alt_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    /// Derived from the name when omitted
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    pub collection: Option<String>,
    pub material: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub shipping_price: Decimal,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub stock_count: i32,
    pub main_image_url: Option<String>,
    #[serde(default)]
    pub images: Vec<ProductImageInput>,
}

fn default_true() -> bool {
    true
}

/// Partial update; a supplied `images` list replaces the gallery
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub category: Option<String>,
    pub collection: Option<String>,
    pub material: Option<String>,
    pub price: Option<Decimal>,
    pub shipping_price: Option<Decimal>,
    pub is_available: Option<bool>,
    pub stock_count: Option<i32>,
    pub main_image_url: Option<String>,
    pub images: Option<Vec<ProductImageInput>>,
}

/// Lowercase ASCII words joined by single hyphens.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn check_non_negative(field: &str, value: Decimal) -> Result<(), ServiceError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "{} must not be negative",
            field
        )));
    }
    Ok(())
}

fn check_stock(stock: i32) -> Result<(), ServiceError> {
    if stock < 0 {
        return Err(ServiceError::ValidationError(
            "stock_count must not be negative".to_string(),
        ));
    }
    Ok(())
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    /// Browse products, newest first
    #[instrument(skip(self))]
    pub async fn list_products(&self, filter: ProductFilter) -> Result<ProductPage, ServiceError> {
        let mut query = Product::find();

        if let Some(category) = filter.category.as_deref().filter(|c| !c.is_empty()) {
            query = query.filter(product::Column::Category.eq(category));
        }
        if let Some(collection) = filter.collection.as_deref().filter(|c| !c.is_empty()) {
            query = query.filter(product::Column::Collection.eq(collection));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(product::Column::Name.contains(search));
        }
        if filter.available_only.unwrap_or(false) {
            query = query.filter(product::Column::IsAvailable.eq(true));
        }

        let per_page = self.config.clamp_page_size(filter.per_page);
        let page = filter.page.unwrap_or(1).max(1);

        let paginator = query
            .order_by_desc(product::Column::CreatedAt)
            .order_by_asc(product::Column::Id)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(ProductPage {
            items,
            total,
            page,
            per_page,
            total_pages: total.div_ceil(per_page),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductDetail, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        let images = gallery(&*self.db, product_id).await?;
        Ok(ProductDetail { product, images })
    }

    pub async fn list_categories(&self) -> Result<Vec<String>, ServiceError> {
        let categories: Vec<String> = Product::find()
            .select_only()
            .column(product::Column::Category)
            .distinct()
            .order_by_asc(product::Column::Category)
            .into_tuple()
            .all(&*self.db)
            .await?;
        Ok(categories)
    }

    pub async fn list_collections(&self) -> Result<Vec<String>, ServiceError> {
        let collections: Vec<Option<String>> = Product::find()
            .select_only()
            .column(product::Column::Collection)
            .filter(product::Column::Collection.is_not_null())
            .distinct()
            .order_by_asc(product::Column::Collection)
            .into_tuple()
            .all(&*self.db)
            .await?;
        Ok(collections.into_iter().flatten().collect())
    }

    /// Create a product with its gallery
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<ProductDetail, ServiceError> {
        input.validate()?;
        check_non_negative("price", input.price)?;
        check_non_negative("shipping_price", input.shipping_price)?;
        check_stock(input.stock_count)?;

        let slug = match input.slug.as_deref() {
            Some(s) if !s.trim().is_empty() => slugify(s),
            _ => slugify(&input.name),
        };
        if slug.is_empty() {
            return Err(ServiceError::ValidationError(
                "slug must contain at least one letter or digit".to_string(),
            ));
        }
        self.ensure_unique_slug(&slug, None).await?;

        let now = Utc::now();
        let product_id = Uuid::new_v4();
        let txn = self.db.begin().await?;

        let product = product::ActiveModel {
            id: Set(product_id),
            name: Set(input.name.trim().to_string()),
            slug: Set(slug),
            description: Set(input.description),
            category: Set(input.category),
            collection: Set(input.collection),
            material: Set(input.material),
            price: Set(input.price),
            shipping_price: Set(input.shipping_price),
            is_available: Set(input.is_available),
            stock_count: Set(input.stock_count),
            main_image_url: Set(input.main_image_url),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(slug_conflict)?;

        insert_gallery(&txn, product_id, &input.images).await?;
        txn.commit().await?;

        info!(product_id = %product_id, slug = %product.slug, "product created");
        self.get_product(product_id).await
    }

    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        input: UpdateProductInput,
    ) -> Result<ProductDetail, ServiceError> {
        input.validate()?;
        if let Some(price) = input.price {
            check_non_negative("price", price)?;
        }
        if let Some(shipping) = input.shipping_price {
            check_non_negative("shipping_price", shipping)?;
        }
        if let Some(stock) = input.stock_count {
            check_stock(stock)?;
        }

        let existing = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let mut active: product::ActiveModel = existing.into();
        if let Some(slug) = input.slug.as_deref() {
            let slug = slugify(slug);
            if slug.is_empty() {
                return Err(ServiceError::ValidationError(
                    "slug must contain at least one letter or digit".to_string(),
                ));
            }
            self.ensure_unique_slug(&slug, Some(product_id)).await?;
            active.slug = Set(slug);
        }
        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(description) = input.description {
            active.description = Set(description);
        }
        if let Some(category) = input.category {
            active.category = Set(category);
        }
        if let Some(collection) = input.collection {
            active.collection = Set(Some(collection));
        }
        if let Some(material) = input.material {
            active.material = Set(Some(material));
        }
        if let Some(price) = input.price {
            active.price = Set(price);
        }
        if let Some(shipping) = input.shipping_price {
            active.shipping_price = Set(shipping);
        }
        if let Some(is_available) = input.is_available {
            active.is_available = Set(is_available);
        }
        if let Some(stock) = input.stock_count {
            active.stock_count = Set(stock);
        }
        if let Some(url) = input.main_image_url {
            active.main_image_url = Set(Some(url));
        }
        active.updated_at = Set(Utc::now());

        let txn = self.db.begin().await?;
        active.update(&txn).await.map_err(slug_conflict)?;
        if let Some(images) = &input.images {
            ProductImage::delete_many()
                .filter(product_image::Column::ProductId.eq(product_id))
                .exec(&txn)
                .await?;
            insert_gallery(&txn, product_id, images).await?;
        }
        txn.commit().await?;

        info!(product_id = %product_id, "product updated");
        self.get_product(product_id).await
    }

    /// Remove a product, its gallery and any cart lines pointing at it.
    /// Order lines keep their snapshot.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        if Product::find_by_id(product_id).one(&txn).await?.is_none() {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }

        ProductImage::delete_many()
            .filter(product_image::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?;
        let removed_lines = CartItem::delete_many()
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?
            .rows_affected;
        Product::delete_by_id(product_id).exec(&txn).await?;
        txn.commit().await?;

        info!(product_id = %product_id, removed_cart_lines = removed_lines, "product deleted");
        Ok(())
    }

    async fn ensure_unique_slug(
        &self,
        slug: &str,
        exclude: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let mut query = Product::find().filter(product::Column::Slug.eq(slug));
        if let Some(id) = exclude {
            query = query.filter(product::Column::Id.ne(id));
        }
        if query.one(&*self.db).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Product slug '{}' already exists",
                slug
            )));
        }
        Ok(())
    }
}

fn slug_conflict(err: sea_orm::DbErr) -> ServiceError {
    if crate::errors::is_unique_violation(&err) {
        ServiceError::Conflict("Product slug already exists".to_string())
    } else {
        ServiceError::DatabaseError(err)
    }
}

/// Gallery of a product ordered by `sort_order`
pub async fn gallery<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<Vec<ProductImageModel>, ServiceError> {
    Ok(ProductImage::find()
        .filter(product_image::Column::ProductId.eq(product_id))
        .order_by_asc(product_image::Column::SortOrder)
        .all(conn)
        .await?)
}

async fn insert_gallery<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    images: &[ProductImageInput],
) -> Result<(), ServiceError> {
    for (position, image) in images.iter().enumerate() {
        image.validate()?;
        product_image::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            url: Set(image.url.clone()),
            alt_text: Set(image.alt_text.clone()),
            sort_order: Set(position as i32),
        }
        .insert(conn)
        .await?;
    }
    Ok(())
}
