//! VPN peer provisioned on the WireGuard gateway.
//!
//! Peers themselves are created by the gateway client, the ledger only tracks
//! them to enforce per-user device limits.

use sea_orm::entity::prelude::*;

/// Device model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Owning user identifier.
    pub user_id: i64,

    /// Peer identifier issued by the gateway.
    pub wg_client_id: String,

    /// Peer display name.
    pub wg_client_name: String,

    /// Disabled devices do not count towards the device limit.
    pub enabled: bool,

    pub created_at: TimeDateTimeWithTimeZone,
}

/// Device model relations.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
