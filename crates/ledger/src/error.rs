use db::{
    payment::{Purpose, Status},
    DbErr, DbErrExt,
};
use derive_more::{Display, Error, From};

/// Errors that may occur during ledger operations.
///
/// Storage-level constraint violations are reported as [`LedgerError::Conflict`],
/// the ledger never retries an operation on its own.
#[derive(Debug, Display, Error, From)]
pub enum LedgerError {
    /// Database-related error.
    DatabaseError(DbErr),

    /// Requested record does not exist.
    #[from(ignore)]
    #[display(fmt = "{} not found", _0)]
    NotFound(#[error(ignore)] &'static str),

    /// Record with the same unique key exists already.
    #[from(ignore)]
    #[display(fmt = "{} already exists", _0)]
    Conflict(#[error(ignore)] &'static str),

    /// User has no free device slots left.
    #[from(ignore)]
    #[display(fmt = "device limit of {} reached", limit)]
    QuotaExceeded { limit: i64 },

    /// Illegal payment status change.
    #[from(ignore)]
    #[display(fmt = "payment can't move from {} to {}", "from.as_str()", "to.as_str()")]
    InvalidTransition { from: Status, to: Status },

    #[display(fmt = "insufficient balance")]
    InsufficientBalance,

    #[display(fmt = "invalid amount")]
    InvalidAmount,

    #[display(fmt = "tariff payment requires a tariff")]
    MissingTariff,

    #[display(fmt = "tariff is not offered anymore")]
    InactiveTariff,

    #[display(fmt = "user can't refer themselves")]
    SelfReferral,

    #[from(ignore)]
    #[display(fmt = "{} payments can't be settled from balance", "_0.as_str()")]
    UnsupportedPurpose(#[error(ignore)] Purpose),
}

impl LedgerError {
    /// Convert an insertion error, reporting unique key violations as conflicts.
    pub(crate) fn from_insert(err: DbErr, entity: &'static str) -> Self {
        if err.is_unique_violation() {
            LedgerError::Conflict(entity)
        } else {
            LedgerError::DatabaseError(err)
        }
    }
}
