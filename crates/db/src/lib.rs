pub mod device;
pub mod payment;
pub mod referral;
pub mod tariff;
pub mod user;

use std::error::Error;

use async_trait::async_trait;
pub use rust_decimal::Decimal;
pub use sea_orm::{
    sea_query, ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database,
    DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait, Iterable, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, QueryTrait, StatementBuilder, TransactionError,
    TransactionTrait,
};
pub use serde_json::Value as Json;
pub use time::{Duration, OffsetDateTime};

/// SQLSTATE reported by PostgreSQL on unique constraint violations.
const PG_UNIQUE_VIOLATION: &str = "23505";

/// Extended result codes reported by SQLite on unique and primary key violations.
const SQLITE_UNIQUE_VIOLATIONS: [&str; 2] = ["2067", "1555"];

pub trait TransactionErrorExt<T, E> {
    /// Convert transaction [`Result`] into a [`Result`] with
    /// a custom error.
    fn into_raw_result(self) -> Result<T, E>;
}

impl<T, E> TransactionErrorExt<T, E> for Result<T, TransactionError<E>>
where
    E: Error + From<DbErr>,
{
    fn into_raw_result(self) -> Result<T, E> {
        match self {
            Ok(val) => Ok(val),
            Err(TransactionError::Connection(err)) => Err(err.into()),
            Err(TransactionError::Transaction(err)) => Err(err),
        }
    }
}

pub trait DbErrExt {
    /// Check if an error was caused by a unique constraint violation.
    fn is_unique_violation(&self) -> bool;
}

impl DbErrExt for DbErr {
    fn is_unique_violation(&self) -> bool {
        use sea_orm::RuntimeErr;

        let (DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(err)))
        | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(err)))) = self
        else {
            return false;
        };

        match err.code() {
            Some(code) => code == PG_UNIQUE_VIOLATION || SQLITE_UNIQUE_VIOLATIONS.contains(&&*code),
            None => false,
        }
    }
}

#[async_trait]
pub trait SelectExt {
    /// Check if at least one record that satisfies a query.
    async fn exists<C: ConnectionTrait + Send>(self, db: &C) -> Result<bool, DbErr>;
}

#[async_trait]
impl<T> SelectExt for T
where
    T: QueryTrait<QueryStatement = sea_query::SelectStatement> + Send,
{
    async fn exists<C: ConnectionTrait + Send>(self, db: &C) -> Result<bool, DbErr> {
        use sea_query::{Expr, Query};

        let mut query = self.into_query();

        // SQLite requires at least one selected expression inside of EXISTS
        query.expr(1);

        let stmt = StatementBuilder::build(
            Query::select().expr(Expr::exists(query)),
            &db.get_database_backend(),
        );

        db.query_one(stmt)
            .await?
            .ok_or_else(|| DbErr::Custom(String::from("EXISTS query returned no rows")))?
            .try_get_by_index(0)
    }
}
