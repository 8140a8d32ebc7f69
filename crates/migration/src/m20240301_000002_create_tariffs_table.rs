use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tariffs::Table)
                    .col(
                        ColumnDef::new(Tariffs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Tariffs::Name).string_len(100).not_null())
                    .col(ColumnDef::new(Tariffs::Days).integer().not_null())
                    .col(ColumnDef::new(Tariffs::Price).decimal_len(12, 2).not_null())
                    .col(ColumnDef::new(Tariffs::MaxDevices).integer().not_null())
                    .col(
                        ColumnDef::new(Tariffs::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Tariffs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .extra("DEFAULT CURRENT_TIMESTAMP".to_string()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tariffs::Table).to_owned())
            .await
    }
}

/// Learn more at https://docs.rs/sea-query#iden
#[derive(Iden)]
pub(crate) enum Tariffs {
    Table,
    Id,
    Name,
    Days,
    Price,
    MaxDevices,
    IsActive,
    CreatedAt,
}
