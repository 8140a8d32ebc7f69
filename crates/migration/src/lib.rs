pub use sea_orm_migration::prelude::*;

mod m20240301_000001_create_users_table;
mod m20240301_000002_create_tariffs_table;
mod m20240301_000003_create_devices_table;
mod m20240301_000004_create_payments_table;
mod m20240301_000005_create_referrals_table;

pub(crate) use m20240301_000001_create_users_table::Users;
pub(crate) use m20240301_000002_create_tariffs_table::Tariffs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_users_table::Migration),
            Box::new(m20240301_000002_create_tariffs_table::Migration),
            Box::new(m20240301_000003_create_devices_table::Migration),
            Box::new(m20240301_000004_create_payments_table::Migration),
            Box::new(m20240301_000005_create_referrals_table::Migration),
        ]
    }
}
