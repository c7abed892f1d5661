//! Seed data script - populates the storefront with a demo jewelry catalog
//!
//! Run with: cargo run --bin seed-data -- --migrate
//!
//! Products whose slug already exists are skipped, so the script can be
//! re-run against the same database.

use chrono::Utc;
use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use tracing::info;
use uuid::Uuid;

use jewelry_store::{
    db,
    entities::{product, product_image},
    services::commerce::catalog_service::slugify,
};

#[derive(Debug, Parser)]
#[command(name = "seed-data", about = "Load a demo jewelry catalog")]
struct Args {
    /// Database to seed
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite://jewelry_store.db?mode=rwc"
    )]
    database_url: String,

    /// Apply pending migrations first
    #[arg(long)]
    migrate: bool,
}

struct SeedProduct {
    name: &'static str,
    category: &'static str,
    collection: Option<&'static str>,
    material: &'static str,
    description: &'static str,
    price: Decimal,
    shipping_price: Decimal,
    stock_count: i32,
    images: &'static [&'static str],
}

fn catalog() -> Vec<SeedProduct> {
    vec![
        SeedProduct {
            name: "Solitaire Diamond Ring",
            category: "rings",
            collection: Some("Bridal"),
            material: "18k white gold",
            description: "A single brilliant-cut diamond on a slim band.",
            price: dec!(1250.00),
            shipping_price: dec!(15.00),
            stock_count: 4,
            images: &["solitaire-front.jpg", "solitaire-side.jpg"],
        },
        SeedProduct {
            name: "Eternity Band",
            category: "rings",
            collection: Some("Bridal"),
            material: "platinum",
            description: "Channel-set diamonds all the way around.",
            price: dec!(980.00),
            shipping_price: dec!(15.00),
            stock_count: 6,
            images: &["eternity-front.jpg"],
        },
        SeedProduct {
            name: "Freshwater Pearl Necklace",
            category: "necklaces",
            collection: Some("Heritage"),
            material: "sterling silver",
            description: "Hand-knotted freshwater pearls with a silver clasp.",
            price: dec!(320.00),
            shipping_price: dec!(8.50),
            stock_count: 10,
            images: &["pearl-necklace.jpg", "pearl-clasp.jpg"],
        },
        SeedProduct {
            name: "Gold Chain Pendant",
            category: "necklaces",
            collection: None,
            material: "14k yellow gold",
            description: "Minimal bar pendant on a fine cable chain.",
            price: dec!(210.00),
            shipping_price: dec!(8.50),
            stock_count: 15,
            images: &["bar-pendant.jpg"],
        },
        SeedProduct {
            name: "Sapphire Stud Earrings",
            category: "earrings",
            collection: Some("Heritage"),
            material: "18k yellow gold",
            description: "Round blue sapphires in four-prong settings.",
            price: dec!(540.00),
            shipping_price: dec!(6.00),
            stock_count: 8,
            images: &["sapphire-studs.jpg"],
        },
        SeedProduct {
            name: "Hammered Hoop Earrings",
            category: "earrings",
            collection: None,
            material: "sterling silver",
            description: "Lightweight hoops with a hand-hammered finish.",
            price: dec!(85.00),
            shipping_price: dec!(5.00),
            stock_count: 25,
            images: &["hammered-hoops.jpg"],
        },
        SeedProduct {
            name: "Tennis Bracelet",
            category: "bracelets",
            collection: Some("Bridal"),
            material: "14k white gold",
            description: "A continuous line of matched diamonds.",
            price: dec!(1890.00),
            shipping_price: dec!(20.00),
            stock_count: 2,
            images: &["tennis-bracelet.jpg", "tennis-bracelet-clasp.jpg"],
        },
        SeedProduct {
            name: "Signet Ring",
            category: "rings",
            collection: None,
            material: "sterling silver",
            description: "Engravable oval signet. Currently out of stock.",
            price: dec!(150.00),
            shipping_price: dec!(5.00),
            stock_count: 0,
            images: &[],
        },
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    info!("Connecting to database: {}", args.database_url);
    let pool = db::establish_connection(&args.database_url).await?;
    if args.migrate {
        db::run_migrations(&pool).await?;
    }

    let mut created = 0usize;
    for item in catalog() {
        if seed_product(&pool, &item).await? {
            created += 1;
        }
    }

    info!("Seed complete: {} products created", created);
    info!("Try: curl http://localhost:8080/api/v1/products");
    db::close_pool(pool).await?;
    Ok(())
}

/// Insert one product with its gallery. Returns false when the slug exists.
async fn seed_product(pool: &DatabaseConnection, item: &SeedProduct) -> anyhow::Result<bool> {
    let slug = slugify(item.name);
    let existing = product::Entity::find()
        .filter(product::Column::Slug.eq(slug.clone()))
        .one(pool)
        .await?;
    if existing.is_some() {
        info!("  skipping {} (already present)", slug);
        return Ok(false);
    }

    let now = Utc::now();
    let product_id = Uuid::new_v4();
    let image_url = |file: &str| format!("https://cdn.example.com/jewelry/{}", file);

    let txn = pool.begin().await?;
    product::ActiveModel {
        id: Set(product_id),
        name: Set(item.name.to_string()),
        slug: Set(slug.clone()),
        description: Set(item.description.to_string()),
        category: Set(item.category.to_string()),
        collection: Set(item.collection.map(str::to_string)),
        material: Set(Some(item.material.to_string())),
        price: Set(item.price),
        shipping_price: Set(item.shipping_price),
        is_available: Set(item.stock_count > 0),
        stock_count: Set(item.stock_count),
        main_image_url: Set(item.images.first().map(|f| image_url(f))),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;

    for (position, file) in item.images.iter().enumerate() {
        product_image::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            url: Set(image_url(file)),
            alt_text: Set(Some(item.name.to_string())),
            sort_order: Set(position as i32),
        }
        .insert(&txn)
        .await?;
    }
    txn.commit().await?;

    info!("  created {}", slug);
    Ok(true)
}
