mod devices;
mod payments;
mod tariffs;
mod users;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use db::{payment::Status, Decimal};
use ledger::{Ledger, LedgerError, ReportPeriod, UserScope};

pub use devices::device;
pub use payments::payment;
pub use tariffs::tariff;
pub use users::user;

#[derive(Parser)]
#[command(about, version)]
pub(crate) struct Cli {
    /// Path to the configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Inspect and adjust users.
    #[command(subcommand)]
    User(UserCommand),

    /// Manage tariffs offered to users.
    #[command(subcommand)]
    Tariff(TariffCommand),

    /// Manage WireGuard devices of users.
    #[command(subcommand)]
    Device(DeviceCommand),

    /// Inspect and settle payments.
    #[command(subcommand)]
    Payment(PaymentCommand),

    /// Show service statistics.
    Stats,
}

#[derive(Subcommand)]
pub enum UserCommand {
    /// Register a new user.
    Create {
        /// Telegram user identifier.
        tg_id: i64,

        /// Telegram username.
        #[arg(long)]
        username: Option<String>,

        /// Referral code of the inviting user.
        #[arg(long)]
        referral_code: Option<String>,
    },

    /// Show user details.
    Show { tg_id: i64 },

    /// Find a user by Telegram username.
    Find {
        /// Username, with or without the leading `@`.
        username: String,
    },

    /// List Telegram identifiers of users in a scope.
    List {
        /// One of `all`, `active` or `inactive`.
        #[arg(long, default_value = "all")]
        scope: UserScope,
    },

    /// Change user balance, negative amounts debit it.
    Credit {
        tg_id: i64,

        #[arg(allow_negative_numbers = true)]
        amount: Decimal,
    },

    /// Prolong user subscription.
    Extend { tg_id: i64, days: u32 },

    /// Set device quota granted by the tariff.
    Quota { tg_id: i64, quota: u16 },

    /// Grant an extra device slot.
    GrantDevice { tg_id: i64 },

    /// Revoke an extra device slot.
    RevokeDevice { tg_id: i64 },

    /// Clear subscription and device quota.
    Reset { tg_id: i64 },

    /// Show referral activity.
    Referrals { tg_id: i64 },

    /// Delete user with all of their devices and payments.
    Delete { tg_id: i64 },
}

#[derive(Subcommand)]
pub enum TariffCommand {
    /// Add a new tariff.
    Add {
        name: String,

        /// Subscription length in days.
        days: u16,

        price: Decimal,

        /// Number of devices allowed with the tariff.
        #[arg(long, default_value_t = 1)]
        max_devices: u16,
    },

    /// List tariffs currently offered.
    List,

    /// Start offering a tariff again.
    Enable { id: i64 },

    /// Stop offering a tariff.
    Disable { id: i64 },
}

#[derive(Subcommand)]
pub enum DeviceCommand {
    /// List devices of a user.
    List { tg_id: i64 },

    /// Enable a device if the quota allows.
    Enable { id: i64 },

    /// Disable a device.
    Disable { id: i64 },

    /// Delete a device.
    Delete { id: i64 },

    /// Disable devices exceeding the user's limit.
    Enforce { tg_id: i64 },
}

#[derive(Subcommand)]
pub enum PaymentCommand {
    /// Show payment details.
    Show { external_id: String },

    /// Apply a status reported by the payment provider.
    Finalize {
        external_id: String,

        /// New status, either `succeeded` or `canceled`.
        status: Status,
    },

    /// List oldest pending payments.
    Pending {
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },

    /// Summarize succeeded payments.
    Report {
        /// One of `today`, `month`, `year` or `all`.
        #[arg(default_value = "today")]
        period: ReportPeriod,
    },
}

pub async fn stats(ledger: &Ledger) -> Result<(), LedgerError> {
    let stats = ledger.statistics().await?;

    println!("users:                {}", stats.users);
    println!("active subscriptions: {}", stats.active_subscriptions);
    println!("enabled devices:      {}", stats.enabled_devices);

    Ok(())
}
