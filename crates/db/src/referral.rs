//! Completed referral bonus.
//!
//! A single row exists per referrer and referred user pair.

use sea_orm::entity::prelude::*;

/// Referral model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "referrals")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub referrer_user_id: i64,
    pub referred_user_id: i64,

    /// Amount credited to the referrer.
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub bonus_amount: Decimal,

    pub created_at: TimeDateTimeWithTimeZone,
}

/// Referral model relations.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::ReferrerUserId",
        to = "super::user::Column::Id"
    )]
    Referrer,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::ReferredUserId",
        to = "super::user::Column::Id"
    )]
    Referred,
}

impl ActiveModelBehavior for ActiveModel {}
