//! Registered bot user.
//!
//! Users are the root aggregate of the ledger: devices, payments and referral
//! records are removed together with the user that owns them. The
//! `referred_by_user_id` column is only a back reference to another user and is
//! cleared when the referrer is deleted.

use rand::{
    distributions::{Alphanumeric, DistString},
    thread_rng,
};
use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

pub const REFERRAL_CODE_LENGTH: usize = 8;

/// User model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Telegram user identifier.
    #[sea_orm(unique)]
    pub tg_id: i64,

    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,

    /// Balance in currency units.
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub balance: Decimal,

    pub is_admin: bool,

    /// Code other users may pass on registration to be linked to this user.
    #[sea_orm(unique)]
    pub referral_code: Option<String>,

    pub referred_by_user_id: Option<i64>,

    /// Base subscription expiry, [`None`] if the user never had one.
    pub subscription_until: Option<TimeDateTimeWithTimeZone>,

    /// Device slots granted by the purchased tariff.
    pub device_quota: i32,

    /// Device slots purchased separately.
    pub extra_devices: i32,

    pub created_at: TimeDateTimeWithTimeZone,
    pub updated_at: TimeDateTimeWithTimeZone,
}

impl Model {
    /// Maximum number of enabled devices.
    pub fn device_limit(&self) -> i64 {
        i64::from(self.device_quota) + i64::from(self.extra_devices)
    }

    /// Number of devices the user may keep enabled at the provided moment.
    ///
    /// Extra device slots are paid separately and outlive the subscription,
    /// the tariff quota only counts while the subscription is running.
    pub fn allowed_devices(&self, now: OffsetDateTime) -> i64 {
        let quota = if self.has_active_subscription(now) {
            i64::from(self.device_quota)
        } else {
            0
        };

        quota + i64::from(self.extra_devices).max(0)
    }

    /// Check if the base subscription is still running at the provided moment.
    pub fn has_active_subscription(&self, now: OffsetDateTime) -> bool {
        self.subscription_until
            .map(|until| until > now)
            .unwrap_or(false)
    }
}

/// User model relations.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::device::Entity")]
    Devices,

    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,

    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::ReferredByUserId",
        to = "Column::Id"
    )]
    ReferredBy,
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Devices.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Generate a new random referral code.
///
/// ## Example
///
/// ```
/// use db::user::{generate_referral_code, REFERRAL_CODE_LENGTH};
///
/// let code = generate_referral_code();
/// assert_eq!(code.len(), REFERRAL_CODE_LENGTH);
/// ```
pub fn generate_referral_code() -> String {
    Alphanumeric.sample_string(&mut thread_rng(), REFERRAL_CODE_LENGTH)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use time::{Duration, OffsetDateTime};

    use super::Model;

    fn user(subscription_until: Option<OffsetDateTime>) -> Model {
        let now = OffsetDateTime::now_utc();

        Model {
            id: 1,
            tg_id: 100,
            username: None,
            first_name: None,
            last_name: None,
            balance: Decimal::ZERO,
            is_admin: false,
            referral_code: None,
            referred_by_user_id: None,
            subscription_until,
            device_quota: 2,
            extra_devices: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn device_limit_includes_extra_slots() {
        assert_eq!(user(None).device_limit(), 3);
    }

    #[test]
    fn extra_slots_outlive_subscription() {
        let now = OffsetDateTime::now_utc();

        assert_eq!(user(None).allowed_devices(now), 1);
        assert_eq!(user(Some(now - Duration::days(1))).allowed_devices(now), 1);
        assert_eq!(user(Some(now + Duration::days(1))).allowed_devices(now), 3);
    }

    #[test]
    fn subscription_activity() {
        let now = OffsetDateTime::now_utc();

        assert!(!user(None).has_active_subscription(now));
        assert!(!user(Some(now - Duration::days(1))).has_active_subscription(now));
        assert!(user(Some(now + Duration::days(1))).has_active_subscription(now));
    }
}
