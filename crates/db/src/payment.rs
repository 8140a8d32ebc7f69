//! Payment transaction record.
//!
//! Payments created through the payment provider carry the provider's payment
//! identifier, which is unique and is used to deduplicate webhook deliveries.
//! Payments settled from the user balance have no such identifier.
//!
//! Payment [`Status`] is a small state machine: every payment starts as
//! [`Status::Pending`] and may move once to either [`Status::Succeeded`] or
//! [`Status::Canceled`], both of which are terminal.

use std::str::FromStr;

use derive_more::{Display, Error};
use sea_orm::entity::prelude::*;
use sea_orm::Iterable;

/// Payment model.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Payment provider identifier.
    #[sea_orm(unique)]
    pub yk_payment_id: Option<String>,

    /// Paying user identifier.
    pub user_id: i64,

    pub status: Status,
    pub purpose: Purpose,

    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub amount: Decimal,

    pub currency: String,

    /// Purchased tariff, if the payment is a [`Purpose::Tariff`] one.
    pub tariff_id: Option<i64>,

    /// Redirect URL for payment confirmation.
    #[sea_orm(column_type = "Text")]
    pub confirmation_url: Option<String>,

    /// Free-form payment metadata.
    pub meta: Option<Json>,

    pub created_at: TimeDateTimeWithTimeZone,
    pub updated_at: TimeDateTimeWithTimeZone,
}

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(Some(50))")]
pub enum Status {
    #[sea_orm(string_value = "pending")]
    Pending,

    #[sea_orm(string_value = "succeeded")]
    Succeeded,

    #[sea_orm(string_value = "canceled")]
    Canceled,
}

impl Status {
    /// Stored status name.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Succeeded => "succeeded",
            Status::Canceled => "canceled",
        }
    }

    /// Check if no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded | Status::Canceled)
    }

    /// Check if a payment may move from the current status to the `next` one.
    pub fn can_transition_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Pending, Status::Succeeded) | (Status::Pending, Status::Canceled)
        )
    }
}

/// Unknown payment status name.
#[derive(Debug, Display, Error)]
#[display(fmt = "unknown payment status: {}", _0)]
pub struct UnknownStatus(#[error(ignore)] pub String);

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_owned()))
    }
}

/// Business reason of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(Some(50))")]
pub enum Purpose {
    /// Tariff purchase, extends the base subscription.
    #[sea_orm(string_value = "TARIFF")]
    Tariff,

    /// Balance top-up.
    #[sea_orm(string_value = "TOPUP")]
    TopUp,

    /// Additional device slot purchase.
    #[sea_orm(string_value = "EXTRA_DEVICE")]
    ExtraDevice,
}

impl Purpose {
    /// Stored purpose name.
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Tariff => "TARIFF",
            Purpose::TopUp => "TOPUP",
            Purpose::ExtraDevice => "EXTRA_DEVICE",
        }
    }
}

/// Unknown payment purpose name.
#[derive(Debug, Display, Error)]
#[display(fmt = "unknown payment purpose: {}", _0)]
pub struct UnknownPurpose(#[error(ignore)] pub String);

impl FromStr for Purpose {
    type Err = UnknownPurpose;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Purpose::iter()
            .find(|purpose| purpose.as_str() == s)
            .ok_or_else(|| UnknownPurpose(s.to_owned()))
    }
}

/// Payment model relations.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,

    #[sea_orm(
        belongs_to = "super::tariff::Entity",
        from = "Column::TariffId",
        to = "super::tariff::Column::Id"
    )]
    Tariff,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::tariff::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tariff.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use sea_orm::{ActiveEnum, Iterable};

    use super::{Purpose, Status};

    #[test]
    fn only_pending_payments_transition() {
        for from in Status::iter() {
            for to in Status::iter() {
                let expected = from == Status::Pending && to != Status::Pending;
                assert_eq!(from.can_transition_to(to), expected, "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!Status::Pending.is_terminal());
        assert!(Status::Succeeded.is_terminal());
        assert!(Status::Canceled.is_terminal());
    }

    #[test]
    fn names_match_stored_values() {
        for status in Status::iter() {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
            assert_eq!(status.as_str(), status.to_value());
        }

        for purpose in Purpose::iter() {
            assert_eq!(purpose.as_str().parse::<Purpose>().unwrap(), purpose);
            assert_eq!(purpose.as_str(), purpose.to_value());
        }

        assert_eq!("EXTRA_DEVICE".parse::<Purpose>().unwrap(), Purpose::ExtraDevice);
        assert_eq!(Status::Succeeded.as_str(), "succeeded");
        assert!("refund".parse::<Status>().is_err());
        assert!("topup".parse::<Purpose>().is_err());
    }
}
