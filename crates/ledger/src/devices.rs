use db::{
    device, ActiveValue, ColumnTrait, DatabaseTransaction, EntityTrait, OffsetDateTime,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionErrorExt, TransactionTrait,
};
use tracing::{debug, info};

use crate::{users::lock_user, Ledger, LedgerError};

async fn enabled_devices(txn: &DatabaseTransaction, user_id: i64) -> Result<i64, LedgerError> {
    let count = device::Entity::find()
        .filter(device::Column::UserId.eq(user_id))
        .filter(device::Column::Enabled.eq(true))
        .count(txn)
        .await?;

    Ok(i64::try_from(count).unwrap_or(i64::MAX))
}

async fn lock_device(
    txn: &DatabaseTransaction,
    device_id: i64,
) -> Result<device::Model, LedgerError> {
    device::Entity::find_by_id(device_id)
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or(LedgerError::NotFound("device"))
}

async fn set_enabled(
    txn: &DatabaseTransaction,
    device: device::Model,
    enabled: bool,
) -> Result<device::Model, LedgerError> {
    let mut device: device::ActiveModel = device.into();
    device.enabled = ActiveValue::Set(enabled);

    Ok(device::Entity::update(device).exec(txn).await?)
}

impl Ledger {
    /// Register a new enabled device of a user.
    ///
    /// Fails with [`LedgerError::QuotaExceeded`] when the user has no free device slots.
    pub async fn register_device(
        &self,
        user_id: i64,
        wg_client_id: impl Into<String>,
        wg_client_name: impl Into<String>,
    ) -> Result<device::Model, LedgerError> {
        let wg_client_id = wg_client_id.into();
        let wg_client_name = wg_client_name.into();

        let device = self
            .db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let user = lock_user(txn, user_id).await?;

                    let limit = user.device_limit();
                    if enabled_devices(txn, user_id).await? >= limit {
                        return Err(LedgerError::QuotaExceeded { limit });
                    }

                    Ok(device::Entity::insert(device::ActiveModel {
                        user_id: ActiveValue::Set(user_id),
                        wg_client_id: ActiveValue::Set(wg_client_id),
                        wg_client_name: ActiveValue::Set(wg_client_name),
                        enabled: ActiveValue::Set(true),
                        created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
                        ..Default::default()
                    })
                    .exec_with_returning(txn)
                    .await?)
                })
            })
            .await
            .into_raw_result()?;

        info!(
            device_id = device.id,
            user_id,
            wg_client_id = %device.wg_client_id,
            "device registered"
        );

        Ok(device)
    }

    /// Enable a device, checking the quota of its owner.
    pub async fn enable_device(&self, device_id: i64) -> Result<device::Model, LedgerError> {
        self.db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let user_id = device::Entity::find_by_id(device_id)
                        .one(txn)
                        .await?
                        .ok_or(LedgerError::NotFound("device"))?
                        .user_id;

                    let user = lock_user(txn, user_id).await?;
                    let device = lock_device(txn, device_id).await?;

                    if device.enabled {
                        debug!(device_id, "device is already enabled");
                        return Ok(device);
                    }

                    let limit = user.device_limit();
                    if enabled_devices(txn, user_id).await? >= limit {
                        return Err(LedgerError::QuotaExceeded { limit });
                    }

                    set_enabled(txn, device, true).await
                })
            })
            .await
            .into_raw_result()
    }

    pub async fn disable_device(&self, device_id: i64) -> Result<device::Model, LedgerError> {
        self.db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let device = lock_device(txn, device_id).await?;

                    if !device.enabled {
                        debug!(device_id, "device is already disabled");
                        return Ok(device);
                    }

                    set_enabled(txn, device, false).await
                })
            })
            .await
            .into_raw_result()
    }

    /// All devices of a user in registration order.
    pub async fn user_devices(&self, user_id: i64) -> Result<Vec<device::Model>, LedgerError> {
        Ok(device::Entity::find()
            .filter(device::Column::UserId.eq(user_id))
            .order_by_asc(device::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn delete_device(&self, device_id: i64) -> Result<(), LedgerError> {
        let result = device::Entity::delete_by_id(device_id)
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            return Err(LedgerError::NotFound("device"));
        }

        info!(device_id, "device deleted");

        Ok(())
    }

    /// Disable the newest enabled devices that exceed what the user is allowed to have.
    ///
    /// Paid extra slots always count, the tariff quota only while the
    /// subscription is running.
    /// Returns the devices that were disabled, so their peers can be turned off.
    pub async fn enforce_device_limit(
        &self,
        user_id: i64,
    ) -> Result<Vec<device::Model>, LedgerError> {
        let disabled = self
            .db
            .transaction::<_, _, LedgerError>(|txn| {
                Box::pin(async move {
                    let user = lock_user(txn, user_id).await?;

                    let allowed = user.allowed_devices(OffsetDateTime::now_utc());
                    let allowed = usize::try_from(allowed).unwrap_or(0);

                    let enabled = device::Entity::find()
                        .filter(device::Column::UserId.eq(user_id))
                        .filter(device::Column::Enabled.eq(true))
                        .order_by_asc(device::Column::Id)
                        .all(txn)
                        .await?;

                    let mut disabled = Vec::new();
                    for device in enabled.into_iter().skip(allowed) {
                        disabled.push(set_enabled(txn, device, false).await?);
                    }

                    Ok(disabled)
                })
            })
            .await
            .into_raw_result()?;

        if !disabled.is_empty() {
            info!(user_id, count = disabled.len(), "devices over the limit disabled");
        }

        Ok(disabled)
    }
}
