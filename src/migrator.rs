use sea_orm_migration::prelude::*;

/// Money columns. SQLite caps decimal precision at 16.
const MONEY_PRECISION: u32 = 16;
const MONEY_SCALE: u32 = 4;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_auth_tables::Migration),
            Box::new(m20240101_000002_create_catalog_tables::Migration),
            Box::new(m20240101_000003_create_cart_tables::Migration),
            Box::new(m20240101_000004_create_order_tables::Migration),
        ]
    }
}

mod m20240101_000001_create_auth_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_auth_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Users::PublicId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Users::Name).string_len(255).not_null())
                        .col(
                            ColumnDef::new(Users::Email)
                                .string_len(255)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Users::PasswordHash).string_len(255).not_null())
                        .col(ColumnDef::new(Users::Role).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Users::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Users::LastLoginAt).timestamp_with_time_zone())
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RefreshTokens::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RefreshTokens::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(RefreshTokens::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(RefreshTokens::TokenId)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(RefreshTokens::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RefreshTokens::Revoked)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(RefreshTokens::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_refresh_tokens_user_id")
                                .from(RefreshTokens::Table, RefreshTokens::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PasswordResetTokens::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PasswordResetTokens::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(PasswordResetTokens::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(PasswordResetTokens::TokenHash)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(PasswordResetTokens::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PasswordResetTokens::UsedAt).timestamp_with_time_zone())
                        .col(
                            ColumnDef::new(PasswordResetTokens::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_password_reset_tokens_user_id")
                                .from(PasswordResetTokens::Table, PasswordResetTokens::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_refresh_tokens_user_id")
                        .table(RefreshTokens::Table)
                        .col(RefreshTokens::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PasswordResetTokens::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RefreshTokens::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Users {
        Table,
        Id,
        PublicId,
        Name,
        Email,
        PasswordHash,
        Role,
        Active,
        LastLoginAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum RefreshTokens {
        Table,
        Id,
        UserId,
        TokenId,
        ExpiresAt,
        Revoked,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum PasswordResetTokens {
        Table,
        Id,
        UserId,
        TokenHash,
        ExpiresAt,
        UsedAt,
        CreatedAt,
    }
}

mod m20240101_000002_create_catalog_tables {
    use super::{MONEY_PRECISION, MONEY_SCALE};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Products::Name).string_len(255).not_null())
                        .col(
                            ColumnDef::new(Products::Slug)
                                .string_len(255)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Products::Description).text().not_null())
                        .col(ColumnDef::new(Products::Category).string_len(100).not_null())
                        .col(ColumnDef::new(Products::Collection).string_len(100))
                        .col(ColumnDef::new(Products::Material).string_len(100))
                        .col(
                            ColumnDef::new(Products::Price)
                                .decimal_len(MONEY_PRECISION, MONEY_SCALE)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::ShippingPrice)
                                .decimal_len(MONEY_PRECISION, MONEY_SCALE)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::IsAvailable)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::StockCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Products::MainImageUrl).string_len(1024))
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ProductImages::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductImages::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(ProductImages::ProductId).uuid().not_null())
                        .col(ColumnDef::new(ProductImages::Url).string_len(1024).not_null())
                        .col(ColumnDef::new(ProductImages::AltText).string_len(255))
                        .col(
                            ColumnDef::new(ProductImages::SortOrder)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_product_images_product_id")
                                .from(ProductImages::Table, ProductImages::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_products_category")
                        .table(Products::Table)
                        .col(Products::Category)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_product_images_product_id")
                        .table(ProductImages::Table)
                        .col(ProductImages::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductImages::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Products {
        Table,
        Id,
        Name,
        Slug,
        Description,
        Category,
        Collection,
        Material,
        Price,
        ShippingPrice,
        IsAvailable,
        StockCount,
        MainImageUrl,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ProductImages {
        Table,
        Id,
        ProductId,
        Url,
        AltText,
        SortOrder,
    }
}

mod m20240101_000003_create_cart_tables {
    use super::{MONEY_PRECISION, MONEY_SCALE};
    use super::m20240101_000001_create_auth_tables::Users;
    use super::m20240101_000002_create_catalog_tables::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_cart_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Carts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Carts::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Carts::UserId).uuid().not_null().unique_key())
                        .col(
                            ColumnDef::new(Carts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Carts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_carts_user_id")
                                .from(Carts::Table, Carts::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartItems::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(CartItems::CartId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(CartItems::PriceAtAddTime)
                                .decimal_len(MONEY_PRECISION, MONEY_SCALE)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CartItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CartItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_cart_id")
                                .from(CartItems::Table, CartItems::CartId)
                                .to(Carts::Table, Carts::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_product_id")
                                .from(CartItems::Table, CartItems::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_items_cart_product")
                        .table(CartItems::Table)
                        .col(CartItems::CartId)
                        .col(CartItems::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Carts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Carts {
        Table,
        Id,
        UserId,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        CartId,
        ProductId,
        Quantity,
        PriceAtAddTime,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_order_tables {
    use super::{MONEY_PRECISION, MONEY_SCALE};
    use super::m20240101_000001_create_auth_tables::Users;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_order_tables"
        }
    }

    fn money(col: Orders) -> ColumnDef {
        ColumnDef::new(col)
            .decimal_len(MONEY_PRECISION, MONEY_SCALE)
            .not_null()
            .default(0)
            .to_owned()
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string_len(50)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(money(Orders::Subtotal))
                        .col(money(Orders::ShippingTotal))
                        .col(money(Orders::TaxTotal))
                        .col(money(Orders::DiscountTotal))
                        .col(money(Orders::GrandTotal))
                        .col(ColumnDef::new(Orders::ShippingFullName).string_len(255))
                        .col(ColumnDef::new(Orders::ShippingAddressLine1).string_len(255))
                        .col(ColumnDef::new(Orders::ShippingAddressLine2).string_len(255))
                        .col(ColumnDef::new(Orders::ShippingCity).string_len(100))
                        .col(ColumnDef::new(Orders::ShippingState).string_len(100))
                        .col(ColumnDef::new(Orders::ShippingPostalCode).string_len(20))
                        .col(ColumnDef::new(Orders::ShippingCountry).string_len(2))
                        .col(ColumnDef::new(Orders::ShippingPhone).string_len(50))
                        .col(
                            ColumnDef::new(Orders::PaypalOrderId)
                                .string_len(64)
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::PaypalCaptureId).string_len(64))
                        .col(ColumnDef::new(Orders::PayerEmail).string_len(255))
                        .col(
                            ColumnDef::new(Orders::GrossAmount)
                                .decimal_len(MONEY_PRECISION, MONEY_SCALE),
                        )
                        .col(
                            ColumnDef::new(Orders::FeeAmount)
                                .decimal_len(MONEY_PRECISION, MONEY_SCALE),
                        )
                        .col(
                            ColumnDef::new(Orders::NetAmount)
                                .decimal_len(MONEY_PRECISION, MONEY_SCALE),
                        )
                        .col(ColumnDef::new(Orders::PaidAt).timestamp_with_time_zone())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_user_id")
                                .from(Orders::Table, Orders::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            // no foreign key on product_id; lines survive product deletion
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OrderItems::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductName).string_len(255).not_null())
                        .col(
                            ColumnDef::new(OrderItems::UnitPrice)
                                .decimal_len(MONEY_PRECISION, MONEY_SCALE)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::LineTotal)
                                .decimal_len(MONEY_PRECISION, MONEY_SCALE)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden, Clone, Copy)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        UserId,
        Status,
        Currency,
        Subtotal,
        ShippingTotal,
        TaxTotal,
        DiscountTotal,
        GrandTotal,
        ShippingFullName,
        ShippingAddressLine1,
        ShippingAddressLine2,
        ShippingCity,
        ShippingState,
        ShippingPostalCode,
        ShippingCountry,
        ShippingPhone,
        PaypalOrderId,
        PaypalCaptureId,
        PayerEmail,
        GrossAmount,
        FeeAmount,
        NetAmount,
        PaidAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        ProductName,
        UnitPrice,
        Quantity,
        LineTotal,
        CreatedAt,
    }
}
