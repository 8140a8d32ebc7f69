use std::str::FromStr;

use db::{
    referral,
    sea_query::{Condition, Expr, Func},
    user, ActiveValue, ColumnTrait, DatabaseTransaction, Decimal, Duration, EntityTrait,
    OffsetDateTime, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, SelectExt,
    TransactionErrorExt, TransactionTrait,
};
use derive_more::{Display, Error};
use tracing::{debug, info, warn};

use crate::{referrals::insert_referral, Ledger, LedgerError};

/// Telegram profile fields stored with a user.
#[derive(Clone, Debug, Default)]
pub struct Profile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Outcome of [`Ledger::register_user`].
#[derive(Debug)]
pub struct Registration {
    pub user: user::Model,

    /// Whether the user was created by this call.
    pub created: bool,

    /// Referral recorded for the referrer of a new user.
    pub referral: Option<referral::Model>,
}

/// Group of users addressed by an administrative broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserScope {
    All,

    /// Users with a running subscription or at least one extra device slot.
    Active,

    /// Users with neither a running subscription nor extra device slots.
    Inactive,
}

impl UserScope {
    fn condition(self, now: OffsetDateTime) -> Condition {
        match self {
            UserScope::All => Condition::all(),
            UserScope::Active => Condition::any()
                .add(user::Column::SubscriptionUntil.gt(now))
                .add(user::Column::ExtraDevices.gt(0)),
            UserScope::Inactive => Condition::all()
                .add(
                    Condition::any()
                        .add(user::Column::SubscriptionUntil.is_null())
                        .add(user::Column::SubscriptionUntil.lte(now)),
                )
                .add(user::Column::ExtraDevices.lte(0)),
        }
    }
}

/// Unknown user scope name.
#[derive(Debug, Display, Error)]
#[display(fmt = "unknown user scope: {}", _0)]
pub struct UnknownScope(#[error(ignore)] pub String);

impl FromStr for UserScope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(UserScope::All),
            "active" => Ok(UserScope::Active),
            "inactive" => Ok(UserScope::Inactive),
            _ => Err(UnknownScope(s.to_owned())),
        }
    }
}

/// Number of attempts to generate a referral code nobody uses yet.
const REFERRAL_CODE_ATTEMPTS: usize = 5;

/// Compute a new subscription expiry.
///
/// Expired subscriptions restart from `now`, running ones are prolonged.
pub(crate) fn extended_until(
    current: Option<OffsetDateTime>,
    now: OffsetDateTime,
    days: i64,
) -> OffsetDateTime {
    let start = match current {
        Some(until) if until > now => until,
        _ => now,
    };

    start + Duration::days(days)
}

/// Lock user row for the rest of the transaction.
pub(crate) async fn lock_user(
    txn: &DatabaseTransaction,
    user_id: i64,
) -> Result<user::Model, LedgerError> {
    user::Entity::find_by_id(user_id)
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or(LedgerError::NotFound("user"))
}

/// Add amount to the balance of a locked user.
pub(crate) async fn credit(
    txn: &DatabaseTransaction,
    user: user::Model,
    amount: Decimal,
) -> Result<user::Model, LedgerError> {
    let balance = user.balance + amount;
    if balance < Decimal::ZERO {
        return Err(LedgerError::InsufficientBalance);
    }

    let mut user: user::ActiveModel = user.into();
    user.balance = ActiveValue::Set(balance);
    user.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());

    Ok(user::Entity::update(user).exec(txn).await?)
}

/// Generate a referral code that is not taken by another user.
async fn unique_referral_code<F>(
    txn: &DatabaseTransaction,
    mut generate: F,
) -> Result<String, LedgerError>
where
    F: FnMut() -> String + Send,
{
    for _ in 0..REFERRAL_CODE_ATTEMPTS {
        let code = generate();

        let taken = user::Entity::find()
            .select_only()
            .filter(user::Column::ReferralCode.eq(code.as_str()))
            .exists(txn)
            .await?;

        if !taken {
            return Ok(code);
        }

        warn!("generated referral code is taken already");
    }

    Err(LedgerError::Conflict("referral code"))
}

async fn insert_user(
    txn: &DatabaseTransaction,
    tg_id: i64,
    profile: Profile,
    is_admin: bool,
) -> Result<user::Model, LedgerError> {
    let exists = user::Entity::find()
        .select_only()
        .filter(user::Column::TgId.eq(tg_id))
        .exists(txn)
        .await?;

    if exists {
        return Err(LedgerError::Conflict("user"));
    }

    let referral_code = unique_referral_code(txn, user::generate_referral_code).await?;
    let now = OffsetDateTime::now_utc();

    user::Entity::insert(user::ActiveModel {
        tg_id: ActiveValue::Set(tg_id),
        username: ActiveValue::Set(profile.username),
        first_name: ActiveValue::Set(profile.first_name),
        last_name: ActiveValue::Set(profile.last_name),
        balance: ActiveValue::Set(Decimal::ZERO),
        is_admin: ActiveValue::Set(is_admin),
        referral_code: ActiveValue::Set(Some(referral_code)),
        referred_by_user_id: ActiveValue::Set(None),
        subscription_until: ActiveValue::Set(None),
        device_quota: ActiveValue::Set(0),
        extra_devices: ActiveValue::Set(0),
        created_at: ActiveValue::Set(now),
        updated_at: ActiveValue::Set(now),
        ..Default::default()
    })
    .exec_with_returning(txn)
    .await
    .map_err(|err| LedgerError::from_insert(err, "user"))
}

impl Ledger {
    /// Create a new user with empty balance and no devices.
    pub async fn create_user(
        &self,
        tg_id: i64,
        profile: Profile,
    ) -> Result<user::Model, LedgerError> {
        let is_admin = self.billing.admin_tg_ids.contains(&tg_id);

        let user = self
            .db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move { insert_user(txn, tg_id, profile, is_admin).await })
            })
            .await
            .into_raw_result()?;

        info!(user_id = user.id, tg_id, "user created");

        Ok(user)
    }

    /// Register a user coming from the bot, optionally invited with a referral code.
    ///
    /// Known users are returned untouched, referral codes only apply to new users.
    /// Unknown codes are ignored. When a concurrent registration of the same
    /// Telegram user wins the race, its user is returned as a known one.
    pub async fn register_user(
        &self,
        tg_id: i64,
        profile: Profile,
        referral_code: Option<String>,
    ) -> Result<Registration, LedgerError> {
        let is_admin = self.billing.admin_tg_ids.contains(&tg_id);
        let billing = self.billing.clone();

        let result = self
            .db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let existing = user::Entity::find()
                        .filter(user::Column::TgId.eq(tg_id))
                        .one(txn)
                        .await?;

                    if let Some(user) = existing {
                        return Ok(Registration {
                            user,
                            created: false,
                            referral: None,
                        });
                    }

                    let user = insert_user(txn, tg_id, profile, is_admin).await?;

                    let referrer = match referral_code {
                        Some(code) => user::Entity::find()
                            .filter(user::Column::ReferralCode.eq(code))
                            .lock_exclusive()
                            .one(txn)
                            .await?
                            .filter(|referrer| referrer.id != user.id),
                        None => None,
                    };

                    let Some(referrer) = referrer else {
                        return Ok(Registration {
                            user,
                            created: true,
                            referral: None,
                        });
                    };

                    let now = OffsetDateTime::now_utc();
                    let trial_quota = user.device_quota.max(1);
                    let mut user: user::ActiveModel = user.into();
                    user.referred_by_user_id = ActiveValue::Set(Some(referrer.id));
                    if billing.referral_trial_days > 0 {
                        let days = i64::from(billing.referral_trial_days);
                        user.subscription_until =
                            ActiveValue::Set(Some(extended_until(None, now, days)));
                        user.device_quota = ActiveValue::Set(trial_quota);
                    }
                    user.updated_at = ActiveValue::Set(now);
                    let user = user::Entity::update(user).exec(txn).await?;

                    let referral = if billing.referrer_signup_bonus > Decimal::ZERO {
                        let bonus = billing.referrer_signup_bonus;
                        Some(insert_referral(txn, referrer, user.id, bonus).await?)
                    } else {
                        None
                    };

                    Ok(Registration {
                        user,
                        created: true,
                        referral,
                    })
                })
            })
            .await
            .into_raw_result();

        let registration = match result {
            Err(LedgerError::Conflict("user")) => Registration {
                user: self.get_user_by_tg_id(tg_id).await?,
                created: false,
                referral: None,
            },
            result => result?,
        };

        if registration.created {
            info!(
                user_id = registration.user.id,
                tg_id,
                referred_by = registration.user.referred_by_user_id,
                "user registered"
            );
        } else {
            debug!(user_id = registration.user.id, "user is already registered");
        }

        Ok(registration)
    }

    pub async fn get_user(&self, user_id: i64) -> Result<user::Model, LedgerError> {
        user::Entity::find_by_id(user_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(LedgerError::NotFound("user"))
    }

    pub async fn get_user_by_tg_id(&self, tg_id: i64) -> Result<user::Model, LedgerError> {
        user::Entity::find()
            .filter(user::Column::TgId.eq(tg_id))
            .one(self.db.as_ref())
            .await?
            .ok_or(LedgerError::NotFound("user"))
    }

    /// Find a user by Telegram username, ignoring case and a leading `@`.
    pub async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<user::Model, LedgerError> {
        let username = username.trim().trim_start_matches('@').to_lowercase();
        if username.is_empty() {
            return Err(LedgerError::NotFound("user"));
        }

        user::Entity::find()
            .filter(Expr::expr(Func::lower(Expr::col(user::Column::Username))).eq(username))
            .order_by_asc(user::Column::Id)
            .one(self.db.as_ref())
            .await?
            .ok_or(LedgerError::NotFound("user"))
    }

    /// Users belonging to a scope, oldest first.
    pub async fn users_by_scope(
        &self,
        scope: UserScope,
    ) -> Result<Vec<user::Model>, LedgerError> {
        Ok(user::Entity::find()
            .filter(scope.condition(OffsetDateTime::now_utc()))
            .order_by_asc(user::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn count_users(&self, scope: UserScope) -> Result<u64, LedgerError> {
        Ok(user::Entity::find()
            .filter(scope.condition(OffsetDateTime::now_utc()))
            .count(self.db.as_ref())
            .await?)
    }

    /// Add amount to the user balance.
    ///
    /// Negative amounts debit the balance, which is never allowed to drop below zero.
    pub async fn credit_balance(
        &self,
        user_id: i64,
        amount: Decimal,
    ) -> Result<user::Model, LedgerError> {
        let user = self
            .db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let user = lock_user(txn, user_id).await?;
                    credit(txn, user, amount).await
                })
            })
            .await
            .into_raw_result()?;

        info!(user_id, %amount, balance = %user.balance, "balance changed");

        Ok(user)
    }

    /// Prolong the subscription by a number of days.
    pub async fn extend_subscription(
        &self,
        user_id: i64,
        days: u32,
    ) -> Result<user::Model, LedgerError> {
        self.db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let user = lock_user(txn, user_id).await?;

                    let now = OffsetDateTime::now_utc();
                    let until = extended_until(user.subscription_until, now, i64::from(days));

                    let mut user: user::ActiveModel = user.into();
                    user.subscription_until = ActiveValue::Set(Some(until));
                    user.updated_at = ActiveValue::Set(now);

                    Ok(user::Entity::update(user).exec(txn).await?)
                })
            })
            .await
            .into_raw_result()
    }

    pub async fn set_device_quota(
        &self,
        user_id: i64,
        quota: u16,
    ) -> Result<user::Model, LedgerError> {
        self.update_user(user_id, move |user| {
            user.device_quota = ActiveValue::Set(i32::from(quota));
        })
        .await
    }

    pub async fn grant_extra_device(&self, user_id: i64) -> Result<user::Model, LedgerError> {
        self.db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let user = lock_user(txn, user_id).await?;
                    let extra_devices = user.extra_devices.saturating_add(1);

                    let mut user: user::ActiveModel = user.into();
                    user.extra_devices = ActiveValue::Set(extra_devices);
                    user.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());

                    Ok(user::Entity::update(user).exec(txn).await?)
                })
            })
            .await
            .into_raw_result()
    }

    /// Take one extra device slot away, never going below zero.
    pub async fn revoke_extra_device(&self, user_id: i64) -> Result<user::Model, LedgerError> {
        self.db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let user = lock_user(txn, user_id).await?;
                    let extra_devices = (user.extra_devices - 1).max(0);

                    let mut user: user::ActiveModel = user.into();
                    user.extra_devices = ActiveValue::Set(extra_devices);
                    user.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());

                    Ok(user::Entity::update(user).exec(txn).await?)
                })
            })
            .await
            .into_raw_result()
    }

    /// Clear subscription expiry and the tariff device quota.
    pub async fn reset_subscription(&self, user_id: i64) -> Result<user::Model, LedgerError> {
        self.update_user(user_id, |user| {
            user.subscription_until = ActiveValue::Set(None);
            user.device_quota = ActiveValue::Set(0);
        })
        .await
    }

    /// Delete user together with their devices, payments and referral records.
    pub async fn delete_user(&self, user_id: i64) -> Result<(), LedgerError> {
        let result = user::Entity::delete_by_id(user_id)
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            return Err(LedgerError::NotFound("user"));
        }

        info!(user_id, "user deleted");

        Ok(())
    }

    async fn update_user<F>(&self, user_id: i64, update: F) -> Result<user::Model, LedgerError>
    where
        F: FnOnce(&mut user::ActiveModel) + Send + 'static,
    {
        self.db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let user = lock_user(txn, user_id).await?;

                    let mut user: user::ActiveModel = user.into();
                    update(&mut user);
                    user.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());

                    Ok(user::Entity::update(user).exec(txn).await?)
                })
            })
            .await
            .into_raw_result()
    }
}
