//! Subscription ledger.
//!
//! The ledger owns users, tariffs, devices, payments and referral records of the
//! VPN subscription service. Bot handlers, payment webhook processors and the
//! WireGuard gateway client all operate through a [`Ledger`] value instead of
//! touching the tables directly.
//!
//! Every operation runs in a single database transaction. Read-then-write paths
//! lock the affected user (and payment) rows, so concurrent device registrations,
//! balance changes and duplicate webhook deliveries converge to a single effect.
//! When more than one row is locked, the user row is always locked first.

mod devices;
mod error;
mod payments;
mod referrals;
mod statistics;
mod tariffs;
mod users;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use common::config::Billing;
use db::DatabaseConnection;

pub use error::LedgerError;
pub use payments::{Finalization, NewPayment};
pub use referrals::ReferralSummary;
pub use statistics::{PaymentReport, PurposeTotal, ReportPeriod, Statistics, UnknownPeriod};
pub use tariffs::NewTariff;
pub use users::{Profile, Registration, UnknownScope, UserScope};

/// Subscription ledger handle.
///
/// Cloning a ledger is cheap, all clones share the same connection pool.
#[derive(Clone)]
pub struct Ledger {
    db: Arc<DatabaseConnection>,
    billing: Arc<Billing>,
}

impl Ledger {
    /// Create a new ledger on top of an established database connection.
    pub fn new(db: DatabaseConnection, billing: Billing) -> Self {
        Self {
            db: Arc::new(db),
            billing: Arc::new(billing),
        }
    }

    /// Billing rules used by this ledger.
    pub fn billing(&self) -> &Billing {
        &self.billing
    }
}
