use std::str::FromStr;

use db::{
    device,
    payment::{self, Purpose, Status},
    user, ColumnTrait, Decimal, Duration, EntityTrait, Iterable, OffsetDateTime, PaginatorTrait,
    QueryFilter,
};
use derive_more::{Display, Error};

use crate::{Ledger, LedgerError};

/// Service-wide counters shown to administrators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    pub users: u64,

    /// Users whose subscription has not expired yet.
    pub active_subscriptions: u64,

    pub enabled_devices: u64,
}

/// Reporting period ending at the current moment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportPeriod {
    /// Since midnight.
    Today,

    /// Since the first day of the month.
    Month,

    /// Since the first day of the year.
    Year,

    All,
}

impl ReportPeriod {
    /// Start of the period that contains `now`, in the offset of `now`.
    pub fn start(self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        let today = now.date();
        let first_day = match self {
            ReportPeriod::Today => today,
            ReportPeriod::Month => today - Duration::days(i64::from(today.day()) - 1),
            ReportPeriod::Year => today - Duration::days(i64::from(today.ordinal()) - 1),
            ReportPeriod::All => return None,
        };

        Some(first_day.midnight().assume_offset(now.offset()))
    }
}

/// Unknown report period name.
#[derive(Debug, Display, Error)]
#[display(fmt = "unknown report period: {}", _0)]
pub struct UnknownPeriod(#[error(ignore)] pub String);

impl FromStr for ReportPeriod {
    type Err = UnknownPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(ReportPeriod::Today),
            "month" => Ok(ReportPeriod::Month),
            "year" => Ok(ReportPeriod::Year),
            "all" => Ok(ReportPeriod::All),
            _ => Err(UnknownPeriod(s.to_owned())),
        }
    }
}

/// Succeeded payments of a single purpose.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurposeTotal {
    pub purpose: Purpose,
    pub count: u64,
    pub total: Decimal,
}

/// Revenue received over a reporting period.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentReport {
    pub count: u64,
    pub total: Decimal,

    /// Totals of purposes that have at least one payment.
    pub by_purpose: Vec<PurposeTotal>,
}

impl Ledger {
    /// Summarize succeeded payments created during a period.
    pub async fn payment_report(
        &self,
        period: ReportPeriod,
    ) -> Result<PaymentReport, LedgerError> {
        let now = OffsetDateTime::now_utc();
        self.payments_between(period.start(now), now).await
    }

    /// Summarize succeeded payments created in `[start, end)`.
    async fn payments_between(
        &self,
        start: Option<OffsetDateTime>,
        end: OffsetDateTime,
    ) -> Result<PaymentReport, LedgerError> {
        let mut query = payment::Entity::find()
            .filter(payment::Column::Status.eq(Status::Succeeded))
            .filter(payment::Column::CreatedAt.lt(end));

        if let Some(start) = start {
            query = query.filter(payment::Column::CreatedAt.gte(start));
        }

        let payments = query.all(self.db.as_ref()).await?;

        let by_purpose = Purpose::iter()
            .map(|purpose| {
                let matching = payments.iter().filter(|payment| payment.purpose == purpose);

                PurposeTotal {
                    purpose,
                    count: matching.clone().count() as u64,
                    total: matching.map(|payment| payment.amount).sum(),
                }
            })
            .filter(|total| total.count > 0)
            .collect();

        Ok(PaymentReport {
            count: payments.len() as u64,
            total: payments.iter().map(|payment| payment.amount).sum(),
            by_purpose,
        })
    }

    pub async fn statistics(&self) -> Result<Statistics, LedgerError> {
        let db = self.db.as_ref();

        let users = user::Entity::find().count(db).await?;
        let active_subscriptions = user::Entity::find()
            .filter(user::Column::SubscriptionUntil.gt(OffsetDateTime::now_utc()))
            .count(db)
            .await?;
        let enabled_devices = device::Entity::find()
            .filter(device::Column::Enabled.eq(true))
            .count(db)
            .await?;

        Ok(Statistics {
            users,
            active_subscriptions,
            enabled_devices,
        })
    }
}

#[cfg(test)]
mod tests {
    use db::{
        payment::{self, Purpose, Status},
        ActiveValue, Decimal, Duration, EntityTrait, OffsetDateTime,
    };

    use super::{PaymentReport, PurposeTotal, ReportPeriod};
    use crate::{
        testing::{create_ledger, create_user},
        Ledger, NewPayment, Statistics,
    };

    fn at(timestamp: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(timestamp).unwrap()
    }

    async fn insert_payment(
        ledger: &Ledger,
        user_id: i64,
        status: Status,
        purpose: Purpose,
        amount: Decimal,
        created_at: OffsetDateTime,
    ) {
        payment::Entity::insert(payment::ActiveModel {
            user_id: ActiveValue::Set(user_id),
            status: ActiveValue::Set(status),
            purpose: ActiveValue::Set(purpose),
            amount: ActiveValue::Set(amount),
            currency: ActiveValue::Set(String::from("RUB")),
            created_at: ActiveValue::Set(created_at),
            updated_at: ActiveValue::Set(created_at),
            ..Default::default()
        })
        .exec_without_returning(ledger.db.as_ref())
        .await
        .unwrap();
    }

    #[test]
    fn period_bounds() {
        // 2024-03-15 13:45:10 UTC
        let now = at(1_710_510_310);

        // 2024-03-15 00:00:00 UTC
        assert_eq!(ReportPeriod::Today.start(now), Some(at(1_710_460_800)));
        // 2024-03-01 00:00:00 UTC
        assert_eq!(ReportPeriod::Month.start(now), Some(at(1_709_251_200)));
        // 2024-01-01 00:00:00 UTC
        assert_eq!(ReportPeriod::Year.start(now), Some(at(1_704_067_200)));
        assert_eq!(ReportPeriod::All.start(now), None);

        assert_eq!("month".parse::<ReportPeriod>().unwrap(), ReportPeriod::Month);
        assert!("week".parse::<ReportPeriod>().is_err());
    }

    #[tokio::test]
    async fn payments_between() {
        let ledger = create_ledger().await;
        let user = create_user(&ledger, 1).await;

        let start = at(1_709_251_200);
        let end = at(1_710_510_310);

        for (status, purpose, amount, created_at) in [
            (Status::Succeeded, Purpose::Tariff, 300, start),
            (Status::Succeeded, Purpose::Tariff, 500, end - Duration::hours(1)),
            (Status::Succeeded, Purpose::TopUp, 150, start + Duration::days(3)),
            (Status::Canceled, Purpose::TopUp, 1000, start + Duration::days(3)),
            (Status::Pending, Purpose::ExtraDevice, 100, start + Duration::days(3)),
            (Status::Succeeded, Purpose::ExtraDevice, 100, start - Duration::seconds(1)),
            (Status::Succeeded, Purpose::ExtraDevice, 100, end),
        ] {
            let amount = Decimal::new(amount, 0);
            insert_payment(&ledger, user.id, status, purpose, amount, created_at).await;
        }

        assert_eq!(
            ledger.payments_between(Some(start), end).await.unwrap(),
            PaymentReport {
                count: 3,
                total: Decimal::new(950, 0),
                by_purpose: vec![
                    PurposeTotal {
                        purpose: Purpose::Tariff,
                        count: 2,
                        total: Decimal::new(800, 0),
                    },
                    PurposeTotal {
                        purpose: Purpose::TopUp,
                        count: 1,
                        total: Decimal::new(150, 0),
                    },
                ],
            }
        );

        let report = ledger.payments_between(None, end).await.unwrap();
        assert_eq!(report.count, 4);
        assert_eq!(report.total, Decimal::new(1050, 0));
    }

    #[tokio::test]
    async fn payment_report() {
        let ledger = create_ledger().await;
        let user = create_user(&ledger, 1).await;

        assert_eq!(
            ledger.payment_report(ReportPeriod::All).await.unwrap(),
            PaymentReport::default()
        );

        ledger
            .record_payment(NewPayment::new("yk-1", user.id, Purpose::TopUp, Decimal::TEN))
            .await
            .unwrap();
        ledger
            .record_payment(NewPayment::new("yk-2", user.id, Purpose::TopUp, Decimal::ONE))
            .await
            .unwrap();
        ledger
            .finalize_payment("yk-1", Status::Succeeded)
            .await
            .unwrap();

        let report = ledger.payment_report(ReportPeriod::All).await.unwrap();
        assert_eq!(report.count, 1);
        assert_eq!(report.total, Decimal::TEN);
        assert_eq!(
            report.by_purpose,
            vec![PurposeTotal {
                purpose: Purpose::TopUp,
                count: 1,
                total: Decimal::TEN,
            }]
        );
    }

    #[tokio::test]
    async fn statistics() {
        let ledger = create_ledger().await;
        assert_eq!(ledger.statistics().await.unwrap(), Statistics::default());

        let subscriber = create_user(&ledger, 1).await;
        create_user(&ledger, 2).await;

        ledger.extend_subscription(subscriber.id, 30).await.unwrap();
        ledger.set_device_quota(subscriber.id, 2).await.unwrap();
        let device = ledger
            .register_device(subscriber.id, "peer-1", "phone")
            .await
            .unwrap();
        ledger
            .register_device(subscriber.id, "peer-2", "laptop")
            .await
            .unwrap();
        ledger.disable_device(device.id).await.unwrap();

        assert_eq!(
            ledger.statistics().await.unwrap(),
            Statistics {
                users: 2,
                active_subscriptions: 1,
                enabled_devices: 1,
            }
        );
    }
}
