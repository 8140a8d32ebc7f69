use db::{
    referral, user, ActiveValue, ColumnTrait, DatabaseTransaction, Decimal, EntityTrait,
    OffsetDateTime, QueryFilter, QuerySelect, SelectExt, TransactionErrorExt, TransactionTrait,
};
use tracing::info;

use crate::{
    users::{credit, lock_user},
    Ledger, LedgerError,
};

/// Referral activity of a single user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferralSummary {
    /// Number of users invited.
    pub invited: usize,

    /// Total bonus credited for the invitations.
    pub earned: Decimal,
}

/// Record a referral and credit the bonus to the locked referrer.
pub(crate) async fn insert_referral(
    txn: &DatabaseTransaction,
    referrer: user::Model,
    referred_user_id: i64,
    bonus: Decimal,
) -> Result<referral::Model, LedgerError> {
    let exists = referral::Entity::find()
        .select_only()
        .filter(referral::Column::ReferrerUserId.eq(referrer.id))
        .filter(referral::Column::ReferredUserId.eq(referred_user_id))
        .exists(txn)
        .await?;

    if exists {
        return Err(LedgerError::Conflict("referral"));
    }

    let referral = referral::Entity::insert(referral::ActiveModel {
        referrer_user_id: ActiveValue::Set(referrer.id),
        referred_user_id: ActiveValue::Set(referred_user_id),
        bonus_amount: ActiveValue::Set(bonus),
        created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        ..Default::default()
    })
    .exec_with_returning(txn)
    .await
    .map_err(|err| LedgerError::from_insert(err, "referral"))?;

    credit(txn, referrer, bonus).await?;

    info!(
        referrer_id = referral.referrer_user_id,
        referred_id = referral.referred_user_id,
        bonus = %referral.bonus_amount,
        "referral recorded"
    );

    Ok(referral)
}

impl Ledger {
    /// Record a completed referral, crediting the bonus to the referrer.
    pub async fn record_referral(
        &self,
        referrer_user_id: i64,
        referred_user_id: i64,
        bonus: Decimal,
    ) -> Result<referral::Model, LedgerError> {
        if referrer_user_id == referred_user_id {
            return Err(LedgerError::SelfReferral);
        }

        if bonus < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        self.db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let referrer = lock_user(txn, referrer_user_id).await?;

                    let referred_exists = user::Entity::find_by_id(referred_user_id)
                        .select_only()
                        .exists(txn)
                        .await?;

                    if !referred_exists {
                        return Err(LedgerError::NotFound("user"));
                    }

                    insert_referral(txn, referrer, referred_user_id, bonus).await
                })
            })
            .await
            .into_raw_result()
    }

    pub async fn referral_summary(&self, user_id: i64) -> Result<ReferralSummary, LedgerError> {
        let referrals = referral::Entity::find()
            .filter(referral::Column::ReferrerUserId.eq(user_id))
            .all(self.db.as_ref())
            .await?;

        Ok(ReferralSummary {
            invited: referrals.len(),
            earned: referrals
                .iter()
                .map(|referral| referral.bonus_amount)
                .sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use db::{device, payment, payment::Purpose, referral, user, Decimal, EntityTrait};

    use crate::{
        testing::{create_ledger, create_user},
        LedgerError, NewPayment, ReferralSummary,
    };

    #[tokio::test]
    async fn record_referral() {
        let ledger = create_ledger().await;
        let referrer = create_user(&ledger, 1).await;
        let referred = create_user(&ledger, 2).await;

        let referral = ledger
            .record_referral(referrer.id, referred.id, Decimal::new(50, 0))
            .await
            .unwrap();
        assert_eq!(referral.referrer_user_id, referrer.id);
        assert_eq!(referral.referred_user_id, referred.id);

        let referrer = ledger.get_user(referrer.id).await.unwrap();
        assert_eq!(referrer.balance, Decimal::new(50, 0));

        assert_eq!(
            ledger.referral_summary(referrer.id).await.unwrap(),
            ReferralSummary {
                invited: 1,
                earned: Decimal::new(50, 0),
            }
        );
    }

    #[tokio::test]
    async fn duplicate_referral_is_a_conflict() {
        let ledger = create_ledger().await;
        let referrer = create_user(&ledger, 1).await;
        let referred = create_user(&ledger, 2).await;

        ledger
            .record_referral(referrer.id, referred.id, Decimal::new(50, 0))
            .await
            .unwrap();

        assert!(matches!(
            ledger
                .record_referral(referrer.id, referred.id, Decimal::new(50, 0))
                .await,
            Err(LedgerError::Conflict("referral"))
        ));

        let referrer = ledger.get_user(referrer.id).await.unwrap();
        assert_eq!(referrer.balance, Decimal::new(50, 0));
    }

    #[tokio::test]
    async fn invalid_referrals() {
        let ledger = create_ledger().await;
        let referrer = create_user(&ledger, 1).await;
        let referred = create_user(&ledger, 2).await;

        assert!(matches!(
            ledger
                .record_referral(referrer.id, referrer.id, Decimal::ONE)
                .await,
            Err(LedgerError::SelfReferral)
        ));
        assert!(matches!(
            ledger
                .record_referral(referrer.id, referred.id, Decimal::NEGATIVE_ONE)
                .await,
            Err(LedgerError::InvalidAmount)
        ));
        assert!(matches!(
            ledger.record_referral(referrer.id, 999, Decimal::ONE).await,
            Err(LedgerError::NotFound("user"))
        ));
        assert!(matches!(
            ledger.record_referral(999, referred.id, Decimal::ONE).await,
            Err(LedgerError::NotFound("user"))
        ));

        assert_eq!(
            ledger.referral_summary(referrer.id).await.unwrap(),
            ReferralSummary {
                invited: 0,
                earned: Decimal::ZERO,
            }
        );
    }

    #[tokio::test]
    async fn user_deletion_cascades() {
        let ledger = create_ledger().await;
        let referrer = create_user(&ledger, 1).await;
        let referred = ledger
            .register_user(2, Default::default(), referrer.referral_code.clone())
            .await
            .unwrap()
            .user;
        assert_eq!(referred.referred_by_user_id, Some(referrer.id));

        ledger
            .record_referral(referrer.id, referred.id, Decimal::TEN)
            .await
            .unwrap();
        ledger.set_device_quota(referrer.id, 1).await.unwrap();
        ledger
            .register_device(referrer.id, "peer-1", "phone")
            .await
            .unwrap();
        ledger
            .record_payment(NewPayment::new(
                "yk-1",
                referrer.id,
                Purpose::TopUp,
                Decimal::TEN,
            ))
            .await
            .unwrap();

        ledger.delete_user(referrer.id).await.unwrap();

        let db = ledger.db.as_ref();
        assert!(user::Entity::find_by_id(referrer.id)
            .one(db)
            .await
            .unwrap()
            .is_none());
        assert!(device::Entity::find().all(db).await.unwrap().is_empty());
        assert!(payment::Entity::find().all(db).await.unwrap().is_empty());
        assert!(referral::Entity::find().all(db).await.unwrap().is_empty());

        let referred = ledger.get_user(referred.id).await.unwrap();
        assert!(referred.referred_by_user_id.is_none());
    }
}
