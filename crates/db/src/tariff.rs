//! Purchasable subscription plan.
//!
//! Tariffs are never removed while payments reference them. A tariff that is
//! no longer offered is marked inactive instead.

use sea_orm::entity::prelude::*;

/// Tariff model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tariffs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Display name.
    pub name: String,

    /// Subscription length granted by a single purchase.
    pub days: i32,

    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub price: Decimal,

    /// Device quota assigned to the buyer.
    pub max_devices: i32,

    /// Whether the tariff is offered for new purchases.
    pub is_active: bool,

    pub created_at: TimeDateTimeWithTimeZone,
}

/// Tariff model relations.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
