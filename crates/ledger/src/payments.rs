use common::config::Billing;
use db::{
    payment::{self, Purpose, Status},
    tariff, user, ActiveValue, ColumnTrait, DatabaseTransaction, Decimal, EntityTrait, Json,
    OffsetDateTime, QueryFilter, QueryOrder, QuerySelect, SelectExt, TransactionErrorExt,
    TransactionTrait,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    users::{credit, extended_until, lock_user},
    Ledger, LedgerError,
};

/// Payment registration request.
#[derive(Clone, Debug)]
pub struct NewPayment {
    /// Identifier assigned by the payment provider.
    pub external_id: String,
    pub user_id: i64,
    pub purpose: Purpose,
    pub amount: Decimal,
    pub tariff_id: Option<i64>,
    pub confirmation_url: Option<String>,
    pub metadata: Option<Json>,
}

impl NewPayment {
    pub fn new(
        external_id: impl Into<String>,
        user_id: i64,
        purpose: Purpose,
        amount: Decimal,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            user_id,
            purpose,
            amount,
            tariff_id: None,
            confirmation_url: None,
            metadata: None,
        }
    }

    pub fn tariff(mut self, tariff_id: i64) -> Self {
        self.tariff_id = Some(tariff_id);
        self
    }

    pub fn confirmation_url(mut self, url: impl Into<String>) -> Self {
        self.confirmation_url = Some(url.into());
        self
    }

    pub fn metadata(mut self, metadata: Json) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Outcome of [`Ledger::finalize_payment`].
#[derive(Debug)]
pub struct Finalization {
    pub payment: payment::Model,

    /// Whether this call changed the payment status.
    ///
    /// Repeated deliveries of the same provider notification report `false`,
    /// so users are notified exactly once.
    pub changed: bool,
}

/// Share of a payment credited to the referrer of the payer.
fn referral_bonus(amount: Decimal, percent: u32) -> Decimal {
    (amount * Decimal::from(percent) / Decimal::ONE_HUNDRED).round_dp(2)
}

/// Apply the effect of a succeeded payment to its owner.
async fn apply_payment(
    txn: &DatabaseTransaction,
    payment: &payment::Model,
    billing: &Billing,
) -> Result<(), LedgerError> {
    let user = lock_user(txn, payment.user_id).await?;
    let now = OffsetDateTime::now_utc();

    match payment.purpose {
        Purpose::Tariff => {
            let tariff = match payment.tariff_id {
                Some(tariff_id) => tariff::Entity::find_by_id(tariff_id).one(txn).await?,
                None => None,
            };

            let Some(tariff) = tariff else {
                warn!(payment_id = payment.id, "succeeded tariff payment has no tariff, skipping");
                return Ok(());
            };

            let referrer_id = user.referred_by_user_id;
            let until = extended_until(user.subscription_until, now, i64::from(tariff.days));

            let mut user: user::ActiveModel = user.into();
            user.subscription_until = ActiveValue::Set(Some(until));
            user.device_quota = ActiveValue::Set(tariff.max_devices);
            user.updated_at = ActiveValue::Set(now);
            user::Entity::update(user).exec(txn).await?;

            let bonus = referral_bonus(payment.amount, billing.referral_bonus_percent);
            if let Some(referrer_id) = referrer_id.filter(|_| bonus > Decimal::ZERO) {
                let referrer = lock_user(txn, referrer_id).await?;
                credit(txn, referrer, bonus).await?;

                info!(referrer_id, %bonus, "referral bonus credited");
            }
        }
        Purpose::TopUp => {
            credit(txn, user, payment.amount).await?;
        }
        Purpose::ExtraDevice => {
            let extra_devices = user.extra_devices.saturating_add(1);

            let mut user: user::ActiveModel = user.into();
            user.extra_devices = ActiveValue::Set(extra_devices);
            user.updated_at = ActiveValue::Set(now);
            user::Entity::update(user).exec(txn).await?;
        }
    }

    Ok(())
}

impl Ledger {
    /// Register a new pending payment created at the payment provider.
    pub async fn record_payment(&self, new: NewPayment) -> Result<payment::Model, LedgerError> {
        if new.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        if new.purpose == Purpose::Tariff && new.tariff_id.is_none() {
            return Err(LedgerError::MissingTariff);
        }

        let currency = self.billing.currency.clone();

        let payment = self
            .db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let exists = payment::Entity::find()
                        .select_only()
                        .filter(payment::Column::YkPaymentId.eq(new.external_id.as_str()))
                        .exists(txn)
                        .await?;

                    if exists {
                        return Err(LedgerError::Conflict("payment"));
                    }

                    let user_exists = user::Entity::find_by_id(new.user_id)
                        .select_only()
                        .exists(txn)
                        .await?;

                    if !user_exists {
                        return Err(LedgerError::NotFound("user"));
                    }

                    if let Some(tariff_id) = new.tariff_id {
                        let tariff = tariff::Entity::find_by_id(tariff_id)
                            .one(txn)
                            .await?
                            .ok_or(LedgerError::NotFound("tariff"))?;

                        if new.purpose == Purpose::Tariff && !tariff.is_active {
                            return Err(LedgerError::InactiveTariff);
                        }
                    }

                    let now = OffsetDateTime::now_utc();

                    payment::Entity::insert(payment::ActiveModel {
                        yk_payment_id: ActiveValue::Set(Some(new.external_id)),
                        user_id: ActiveValue::Set(new.user_id),
                        status: ActiveValue::Set(Status::Pending),
                        purpose: ActiveValue::Set(new.purpose),
                        amount: ActiveValue::Set(new.amount),
                        currency: ActiveValue::Set(currency),
                        tariff_id: ActiveValue::Set(new.tariff_id),
                        confirmation_url: ActiveValue::Set(new.confirmation_url),
                        meta: ActiveValue::Set(new.metadata),
                        created_at: ActiveValue::Set(now),
                        updated_at: ActiveValue::Set(now),
                        ..Default::default()
                    })
                    .exec_with_returning(txn)
                    .await
                    .map_err(|err| LedgerError::from_insert(err, "payment"))
                })
            })
            .await
            .into_raw_result()?;

        info!(
            payment_id = payment.id,
            user_id = payment.user_id,
            purpose = payment.purpose.as_str(),
            amount = %payment.amount,
            "payment recorded"
        );

        Ok(payment)
    }

    /// Move a pending payment into a terminal status reported by the provider.
    ///
    /// The effect of a succeeded payment is applied in the same transaction.
    /// Finalizing a payment into the status it already has is a no-op.
    pub async fn finalize_payment(
        &self,
        external_id: &str,
        status: Status,
    ) -> Result<Finalization, LedgerError> {
        let external_id = external_id.to_owned();
        let billing = self.billing.clone();

        let finalization = self
            .db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let payment = payment::Entity::find()
                        .filter(payment::Column::YkPaymentId.eq(external_id.as_str()))
                        .one(txn)
                        .await?
                        .ok_or(LedgerError::NotFound("payment"))?;

                    // Effects lock the payer, which has to happen before the payment row.
                    lock_user(txn, payment.user_id).await?;

                    let payment = payment::Entity::find_by_id(payment.id)
                        .lock_exclusive()
                        .one(txn)
                        .await?
                        .ok_or(LedgerError::NotFound("payment"))?;

                    let current = payment.status;
                    if current == status && current.is_terminal() {
                        return Ok(Finalization {
                            payment,
                            changed: false,
                        });
                    }

                    if !current.can_transition_to(status) {
                        return Err(LedgerError::InvalidTransition {
                            from: current,
                            to: status,
                        });
                    }

                    let mut payment: payment::ActiveModel = payment.into();
                    payment.status = ActiveValue::Set(status);
                    payment.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
                    let payment = payment::Entity::update(payment).exec(txn).await?;

                    if status == Status::Succeeded {
                        apply_payment(txn, &payment, &billing).await?;
                    }

                    Ok(Finalization {
                        payment,
                        changed: true,
                    })
                })
            })
            .await
            .into_raw_result()?;

        let payment = &finalization.payment;
        if finalization.changed {
            info!(
                payment_id = payment.id,
                status = payment.status.as_str(),
                "payment finalized"
            );
        } else {
            debug!(
                payment_id = payment.id,
                status = payment.status.as_str(),
                "payment is already finalized"
            );
        }

        Ok(finalization)
    }

    /// Buy a tariff or an extra device slot using the user balance.
    ///
    /// The stored payment is succeeded right away and carries no external identifier.
    pub async fn pay_with_balance(
        &self,
        user_id: i64,
        purpose: Purpose,
        tariff_id: Option<i64>,
    ) -> Result<payment::Model, LedgerError> {
        let billing = self.billing.clone();

        let payment = self
            .db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let user = lock_user(txn, user_id).await?;

                    let (price, tariff_id) = match purpose {
                        Purpose::Tariff => {
                            let tariff_id = tariff_id.ok_or(LedgerError::MissingTariff)?;
                            let tariff = tariff::Entity::find_by_id(tariff_id)
                                .one(txn)
                                .await?
                                .ok_or(LedgerError::NotFound("tariff"))?;

                            if !tariff.is_active {
                                return Err(LedgerError::InactiveTariff);
                            }

                            (tariff.price, Some(tariff.id))
                        }
                        Purpose::ExtraDevice => (billing.extra_device_price, None),
                        Purpose::TopUp => return Err(LedgerError::UnsupportedPurpose(purpose)),
                    };

                    credit(txn, user, -price).await?;

                    let now = OffsetDateTime::now_utc();

                    let payment = payment::Entity::insert(payment::ActiveModel {
                        yk_payment_id: ActiveValue::Set(None),
                        user_id: ActiveValue::Set(user_id),
                        status: ActiveValue::Set(Status::Succeeded),
                        purpose: ActiveValue::Set(purpose),
                        amount: ActiveValue::Set(price),
                        currency: ActiveValue::Set(billing.currency.clone()),
                        tariff_id: ActiveValue::Set(tariff_id),
                        confirmation_url: ActiveValue::Set(None),
                        meta: ActiveValue::Set(Some(json!({
                            "paid_by_balance": true,
                            "used_balance": price.to_string(),
                        }))),
                        created_at: ActiveValue::Set(now),
                        updated_at: ActiveValue::Set(now),
                        ..Default::default()
                    })
                    .exec_with_returning(txn)
                    .await?;

                    apply_payment(txn, &payment, &billing).await?;

                    Ok(payment)
                })
            })
            .await
            .into_raw_result()?;

        info!(
            payment_id = payment.id,
            user_id,
            purpose = payment.purpose.as_str(),
            amount = %payment.amount,
            "payment settled from balance"
        );

        Ok(payment)
    }

    /// Look a payment up by the identifier assigned by the provider.
    pub async fn get_payment(&self, external_id: &str) -> Result<payment::Model, LedgerError> {
        payment::Entity::find()
            .filter(payment::Column::YkPaymentId.eq(external_id))
            .one(self.db.as_ref())
            .await?
            .ok_or(LedgerError::NotFound("payment"))
    }

    /// Oldest pending payments, to be polled at the provider.
    pub async fn pending_payments(&self, limit: u64) -> Result<Vec<payment::Model>, LedgerError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::Status.eq(Status::Pending))
            .order_by_asc(payment::Column::CreatedAt)
            .order_by_asc(payment::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use common::config::Billing;
    use db::{
        payment::{Purpose, Status},
        Decimal, Duration, OffsetDateTime,
    };
    use serde_json::json;

    use super::referral_bonus;
    use crate::{
        testing::{assert_close, create_ledger, create_ledger_with, create_tariff, create_user},
        LedgerError, NewPayment,
    };

    #[test]
    fn referral_bonus_is_rounded() {
        assert_eq!(referral_bonus(Decimal::new(300, 0), 10), Decimal::new(30, 0));
        assert_eq!(referral_bonus(Decimal::new(9999, 2), 15), Decimal::new(1500, 2));
        assert_eq!(referral_bonus(Decimal::new(300, 0), 0), Decimal::ZERO);
    }

    #[tokio::test]
    async fn record_payment() {
        let ledger = create_ledger().await;
        let user = create_user(&ledger, 1).await;
        let tariff = create_tariff(&ledger, 30, Decimal::new(300, 0), 1).await;

        let payment = ledger
            .record_payment(
                NewPayment::new("yk-1", user.id, Purpose::Tariff, tariff.price)
                    .tariff(tariff.id)
                    .confirmation_url("https://pay.example/yk-1")
                    .metadata(json!({ "tariff_id": tariff.id })),
            )
            .await
            .unwrap();

        assert_eq!(payment.status, Status::Pending);
        assert_eq!(payment.yk_payment_id.as_deref(), Some("yk-1"));
        assert_eq!(payment.currency, "RUB");
        assert_eq!(payment.tariff_id, Some(tariff.id));
        assert_eq!(payment.meta, Some(json!({ "tariff_id": tariff.id })));

        assert_eq!(ledger.get_payment("yk-1").await.unwrap(), payment);

        let duplicate = ledger
            .record_payment(NewPayment::new("yk-1", user.id, Purpose::TopUp, Decimal::ONE))
            .await;
        assert!(matches!(duplicate, Err(LedgerError::Conflict("payment"))));
    }

    #[tokio::test]
    async fn invalid_payments() {
        let ledger = create_ledger().await;
        let user = create_user(&ledger, 1).await;
        let tariff = create_tariff(&ledger, 30, Decimal::new(300, 0), 1).await;

        let result = ledger
            .record_payment(NewPayment::new("yk-1", user.id, Purpose::TopUp, Decimal::ZERO))
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount)));

        let result = ledger
            .record_payment(NewPayment::new("yk-1", user.id, Purpose::Tariff, Decimal::ONE))
            .await;
        assert!(matches!(result, Err(LedgerError::MissingTariff)));

        let result = ledger
            .record_payment(NewPayment::new("yk-1", 999, Purpose::TopUp, Decimal::ONE))
            .await;
        assert!(matches!(result, Err(LedgerError::NotFound("user"))));

        let result = ledger
            .record_payment(
                NewPayment::new("yk-1", user.id, Purpose::Tariff, Decimal::ONE).tariff(999),
            )
            .await;
        assert!(matches!(result, Err(LedgerError::NotFound("tariff"))));

        ledger.set_tariff_active(tariff.id, false).await.unwrap();
        let result = ledger
            .record_payment(
                NewPayment::new("yk-1", user.id, Purpose::Tariff, tariff.price).tariff(tariff.id),
            )
            .await;
        assert!(matches!(result, Err(LedgerError::InactiveTariff)));

        assert!(matches!(
            ledger.get_payment("yk-1").await,
            Err(LedgerError::NotFound("payment"))
        ));
    }

    #[tokio::test]
    async fn tariff_payment_extends_subscription() {
        let ledger = create_ledger().await;
        let user = create_user(&ledger, 1).await;
        let tariff = create_tariff(&ledger, 30, Decimal::new(300, 0), 3).await;

        let now = OffsetDateTime::now_utc();
        ledger.extend_subscription(user.id, 5).await.unwrap();

        ledger
            .record_payment(
                NewPayment::new("yk-1", user.id, Purpose::Tariff, tariff.price).tariff(tariff.id),
            )
            .await
            .unwrap();

        let finalization = ledger
            .finalize_payment("yk-1", Status::Succeeded)
            .await
            .unwrap();
        assert!(finalization.changed);
        assert_eq!(finalization.payment.status, Status::Succeeded);

        let user = ledger.get_user(user.id).await.unwrap();
        assert_close(user.subscription_until.unwrap(), now + Duration::days(35));
        assert_eq!(user.device_quota, 3);
    }

    #[tokio::test]
    async fn finalization_is_applied_once() {
        let ledger = create_ledger().await;
        let user = create_user(&ledger, 1).await;

        ledger
            .record_payment(NewPayment::new(
                "yk-1",
                user.id,
                Purpose::TopUp,
                Decimal::new(15050, 2),
            ))
            .await
            .unwrap();

        let first = ledger
            .finalize_payment("yk-1", Status::Succeeded)
            .await
            .unwrap();
        let second = ledger
            .finalize_payment("yk-1", Status::Succeeded)
            .await
            .unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(second.payment.status, Status::Succeeded);

        let user = ledger.get_user(user.id).await.unwrap();
        assert_eq!(user.balance, Decimal::new(15050, 2));

        assert!(matches!(
            ledger.finalize_payment("yk-1", Status::Canceled).await,
            Err(LedgerError::InvalidTransition {
                from: Status::Succeeded,
                to: Status::Canceled,
            })
        ));
        assert!(matches!(
            ledger.finalize_payment("yk-2", Status::Succeeded).await,
            Err(LedgerError::NotFound("payment"))
        ));
    }

    #[tokio::test]
    async fn concurrent_finalization_is_applied_once() {
        let ledger = create_ledger().await;
        // Transactions serialize on the single test connection, see `create_ledger`.
        let user = create_user(&ledger, 1).await;

        ledger
            .record_payment(NewPayment::new("yk-1", user.id, Purpose::ExtraDevice, Decimal::ONE))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            ledger.finalize_payment("yk-1", Status::Succeeded),
            ledger.finalize_payment("yk-1", Status::Succeeded),
        );

        let changed = [first.unwrap().changed, second.unwrap().changed];
        assert_eq!(changed.iter().filter(|changed| **changed).count(), 1);

        assert_eq!(ledger.get_user(user.id).await.unwrap().extra_devices, 1);
    }

    #[tokio::test]
    async fn canceled_payment_has_no_effect() {
        let ledger = create_ledger().await;
        let user = create_user(&ledger, 1).await;

        ledger
            .record_payment(NewPayment::new("yk-1", user.id, Purpose::TopUp, Decimal::TEN))
            .await
            .unwrap();

        assert!(matches!(
            ledger.finalize_payment("yk-1", Status::Pending).await,
            Err(LedgerError::InvalidTransition {
                from: Status::Pending,
                to: Status::Pending,
            })
        ));

        let finalization = ledger
            .finalize_payment("yk-1", Status::Canceled)
            .await
            .unwrap();
        assert!(finalization.changed);
        assert_eq!(finalization.payment.status, Status::Canceled);

        assert_eq!(ledger.get_user(user.id).await.unwrap().balance, Decimal::ZERO);
        assert!(matches!(
            ledger.finalize_payment("yk-1", Status::Succeeded).await,
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn referrer_gets_share_of_tariff_payment() {
        let ledger = create_ledger().await;
        let inviter = create_user(&ledger, 1).await;
        let user = ledger
            .register_user(2, Default::default(), inviter.referral_code.clone())
            .await
            .unwrap()
            .user;
        let tariff = create_tariff(&ledger, 30, Decimal::new(300, 0), 1).await;

        ledger
            .record_payment(
                NewPayment::new("yk-1", user.id, Purpose::Tariff, tariff.price).tariff(tariff.id),
            )
            .await
            .unwrap();
        ledger
            .finalize_payment("yk-1", Status::Succeeded)
            .await
            .unwrap();

        let inviter = ledger.get_user(inviter.id).await.unwrap();
        assert_eq!(inviter.balance, Decimal::new(30, 0));
    }

    #[tokio::test]
    async fn pay_with_balance() {
        let ledger = create_ledger_with(Billing {
            extra_device_price: Decimal::new(100, 0),
            ..Billing::default()
        })
        .await;
        let user = create_user(&ledger, 1).await;
        let tariff = create_tariff(&ledger, 30, Decimal::new(300, 0), 2).await;

        assert!(matches!(
            ledger
                .pay_with_balance(user.id, Purpose::Tariff, Some(tariff.id))
                .await,
            Err(LedgerError::InsufficientBalance)
        ));

        ledger
            .credit_balance(user.id, Decimal::new(450, 0))
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc();
        let payment = ledger
            .pay_with_balance(user.id, Purpose::Tariff, Some(tariff.id))
            .await
            .unwrap();
        assert_eq!(payment.status, Status::Succeeded);
        assert!(payment.yk_payment_id.is_none());
        assert_eq!(payment.amount, Decimal::new(300, 0));
        let meta = payment.meta.unwrap();
        assert_eq!(meta["paid_by_balance"], json!(true));
        assert_eq!(
            meta["used_balance"].as_str().unwrap().parse::<Decimal>().unwrap(),
            Decimal::new(300, 0)
        );

        let payment = ledger
            .pay_with_balance(user.id, Purpose::ExtraDevice, None)
            .await
            .unwrap();
        assert_eq!(payment.amount, Decimal::new(100, 0));

        let user = ledger.get_user(user.id).await.unwrap();
        assert_eq!(user.balance, Decimal::new(50, 0));
        assert_eq!(user.device_quota, 2);
        assert_eq!(user.extra_devices, 1);
        assert_close(user.subscription_until.unwrap(), now + Duration::days(30));

        assert!(matches!(
            ledger.pay_with_balance(user.id, Purpose::TopUp, None).await,
            Err(LedgerError::UnsupportedPurpose(Purpose::TopUp))
        ));
        assert!(matches!(
            ledger.pay_with_balance(user.id, Purpose::Tariff, None).await,
            Err(LedgerError::MissingTariff)
        ));
        assert!(ledger.pending_payments(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_payments_are_oldest_first() {
        let ledger = create_ledger().await;
        let user = create_user(&ledger, 1).await;

        for external_id in ["yk-1", "yk-2", "yk-3"] {
            ledger
                .record_payment(NewPayment::new(
                    external_id,
                    user.id,
                    Purpose::TopUp,
                    Decimal::ONE,
                ))
                .await
                .unwrap();
        }

        ledger
            .finalize_payment("yk-1", Status::Canceled)
            .await
            .unwrap();

        let pending = ledger.pending_payments(10).await.unwrap();
        assert_eq!(
            pending
                .iter()
                .map(|payment| payment.yk_payment_id.as_deref())
                .collect::<Vec<_>>(),
            vec![Some("yk-2"), Some("yk-3")]
        );

        assert_eq!(ledger.pending_payments(1).await.unwrap().len(), 1);
    }
}
