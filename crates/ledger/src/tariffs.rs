use db::{
    tariff, ActiveValue, ColumnTrait, Decimal, EntityTrait, OffsetDateTime, QueryFilter,
    QueryOrder,
};
use tracing::info;

use crate::{Ledger, LedgerError};

/// Tariff creation request.
#[derive(Clone, Debug)]
pub struct NewTariff {
    pub name: String,

    /// Subscription length in days.
    pub days: u16,

    pub price: Decimal,

    /// Device quota granted with this tariff.
    pub max_devices: u16,
}

impl Ledger {
    /// Create a new active tariff.
    pub async fn create_tariff(&self, tariff: NewTariff) -> Result<tariff::Model, LedgerError> {
        if tariff.price < Decimal::ZERO || tariff.days == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let tariff = tariff::Entity::insert(tariff::ActiveModel {
            name: ActiveValue::Set(tariff.name),
            days: ActiveValue::Set(i32::from(tariff.days)),
            price: ActiveValue::Set(tariff.price),
            max_devices: ActiveValue::Set(i32::from(tariff.max_devices)),
            is_active: ActiveValue::Set(true),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        })
        .exec_with_returning(self.db.as_ref())
        .await?;

        info!(tariff_id = tariff.id, name = %tariff.name, "tariff created");

        Ok(tariff)
    }

    pub async fn get_tariff(&self, tariff_id: i64) -> Result<tariff::Model, LedgerError> {
        tariff::Entity::find_by_id(tariff_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(LedgerError::NotFound("tariff"))
    }

    /// Tariffs currently offered to users, cheapest first.
    pub async fn active_tariffs(&self) -> Result<Vec<tariff::Model>, LedgerError> {
        Ok(tariff::Entity::find()
            .filter(tariff::Column::IsActive.eq(true))
            .order_by_asc(tariff::Column::Price)
            .order_by_asc(tariff::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    /// Start or stop offering a tariff.
    ///
    /// Inactive tariffs can't be bought anymore, but payments that reference
    /// them are still settled.
    pub async fn set_tariff_active(
        &self,
        tariff_id: i64,
        is_active: bool,
    ) -> Result<tariff::Model, LedgerError> {
        let tariff = self.get_tariff(tariff_id).await?;

        let mut tariff: tariff::ActiveModel = tariff.into();
        tariff.is_active = ActiveValue::Set(is_active);

        Ok(tariff::Entity::update(tariff)
            .exec(self.db.as_ref())
            .await?)
    }
}
