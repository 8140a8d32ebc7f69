use common::config::{Billing, Config};
use db::{tariff, user, Database, Decimal, OffsetDateTime};
use migration::MigratorTrait;

use crate::{Ledger, NewTariff, Profile};

/// Create ledger on top of a freshly migrated in-memory database.
///
/// In-memory SQLite is served by a single pooled connection and ignores
/// `FOR UPDATE`, so concurrent calls in tests run one transaction after
/// another. Such tests check that racing calls converge to a single effect,
/// row locking itself is only exercised on PostgreSQL.
pub async fn create_ledger() -> Ledger {
    create_ledger_with(Billing::default()).await
}

pub async fn create_ledger_with(billing: Billing) -> Ledger {
    let db = Database::connect(Config::for_tests().database.url)
        .await
        .expect("unable to create test database");

    migration::Migrator::up(&db, None)
        .await
        .expect("unable to apply migrations");

    Ledger::new(db, billing)
}

pub async fn create_user(ledger: &Ledger, tg_id: i64) -> user::Model {
    ledger
        .create_user(tg_id, Profile::default())
        .await
        .expect("unable to create user")
}

pub async fn create_tariff(
    ledger: &Ledger,
    days: u16,
    price: Decimal,
    max_devices: u16,
) -> tariff::Model {
    ledger
        .create_tariff(NewTariff {
            name: format!("{days} days"),
            days,
            price,
            max_devices,
        })
        .await
        .expect("unable to create tariff")
}

/// Compare timestamps that were computed at slightly different moments.
#[track_caller]
pub fn assert_close(actual: OffsetDateTime, expected: OffsetDateTime) {
    let difference = (actual - expected).abs();
    assert!(
        difference < time_tolerance(),
        "{actual} differs from {expected} by {difference}"
    );
}

fn time_tolerance() -> db::Duration {
    db::Duration::seconds(5)
}
