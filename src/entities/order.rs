use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "fulfilled")]
    Fulfilled,
}

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid) | (Pending, Cancelled) | (Paid, Fulfilled) | (Paid, Cancelled)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Fulfilled => "fulfilled",
        };
        f.write_str(s)
    }
}

/// Placed order. Monetary columns satisfy
/// `grand_total = subtotal + shipping_total + tax_total - discount_total`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[schema(as = Order)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub currency: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub shipping_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub tax_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub grand_total: Decimal,
    pub shipping_full_name: Option<String>,
    pub shipping_address_line1: Option<String>,
    pub shipping_address_line2: Option<String>,
    pub shipping_city: Option<String>,
    pub shipping_state: Option<String>,
    pub shipping_postal_code: Option<String>,
    pub shipping_country: Option<String>,
    pub shipping_phone: Option<String>,
    /// Provider order id; unique so concurrent captures collapse onto one row
    #[sea_orm(unique)]
    pub paypal_order_id: Option<String>,
    pub paypal_capture_id: Option<String>,
    pub payer_email: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub gross_amount: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub fee_amount: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub net_amount: Option<Decimal>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(
        belongs_to = "crate::auth::user::Entity",
        from = "Column::UserId",
        to = "crate::auth::user::Column::Id"
    )]
    User,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<crate::auth::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if !insert {
            self.updated_at = Set(Utc::now());
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;

    #[test]
    fn allowed_transitions() {
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Paid.can_transition_to(Fulfilled));
        assert!(Paid.can_transition_to(Cancelled));
    }

    #[test]
    fn terminal_states_are_final() {
        for next in [Pending, Paid, Cancelled, Fulfilled] {
            assert!(!Cancelled.can_transition_to(next));
            assert!(!Fulfilled.can_transition_to(next));
        }
        assert!(!Pending.can_transition_to(Fulfilled));
        assert!(!Paid.can_transition_to(Pending));
    }
}
