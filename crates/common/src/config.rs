use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use rust_decimal::Decimal;
use serde::Deserialize;

#[cfg(feature = "logging")]
use tracing_subscriber::filter::LevelFilter;

/// Database configuration.
#[derive(Deserialize)]
pub struct Database {
    /// Database URL string.
    pub url: String,
}

/// Implementation of [`serde`]'s deserializer for [`FromStr`] types.
///
/// [`FromStr`]: std::str::FromStr
#[cfg(feature = "logging")]
fn deserialize_from_str<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: std::str::FromStr,
    T::Err: std::error::Error,
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    std::str::FromStr::from_str(&s).map_err(serde::de::Error::custom)
}

/// Logging configuration.
#[cfg(feature = "logging")]
#[derive(Deserialize)]
pub struct Logging {
    /// Log level.
    #[serde(deserialize_with = "deserialize_from_str")]
    pub level: LevelFilter,
}

#[cfg(feature = "logging")]
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::WARN,
        }
    }
}

/// Business rules applied by the subscription ledger.
#[derive(Clone, Debug, Deserialize)]
pub struct Billing {
    /// Currency code stored with every payment.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Share of a referred user's tariff payment credited to the referrer, in percent.
    #[serde(default = "default_referral_bonus_percent")]
    pub referral_bonus_percent: u32,

    /// Fixed amount credited to a referrer once a referred user registers.
    #[serde(default)]
    pub referrer_signup_bonus: Decimal,

    /// Subscription days granted to a user registered with a referral code.
    #[serde(default)]
    pub referral_trial_days: u32,

    /// Price of one extra device slot.
    #[serde(default = "default_extra_device_price")]
    pub extra_device_price: Decimal,

    /// Telegram identifiers of users that are registered as administrators.
    #[serde(default)]
    pub admin_tg_ids: Vec<i64>,
}

fn default_currency() -> String {
    String::from("RUB")
}

fn default_referral_bonus_percent() -> u32 {
    10
}

fn default_extra_device_price() -> Decimal {
    Decimal::new(10000, 2)
}

impl Default for Billing {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            referral_bonus_percent: default_referral_bonus_percent(),
            referrer_signup_bonus: Decimal::ZERO,
            referral_trial_days: 0,
            extra_device_price: default_extra_device_price(),
            admin_tg_ids: Vec::new(),
        }
    }
}

/// General configuration.
#[derive(Deserialize)]
pub struct Config {
    /// General database configuration.
    pub database: Database,

    /// Logging configuration.
    #[cfg(feature = "logging")]
    #[serde(default)]
    pub logging: Logging,

    /// Billing rules.
    #[serde(default)]
    pub billing: Billing,
}

impl Config {
    /// Create new config using default configuration file or environment variables.
    ///
    /// Nested keys are separated by a double underscore, e.g. `CONFIG_BILLING__CURRENCY`.
    /// A plain `DATABASE_URL` variable is accepted as well.
    ///
    /// See [`Env`] for more details on how to use environment variables configuration.
    ///
    /// [`Env`]: figment::providers::Env
    pub fn new(path: Option<PathBuf>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.unwrap_or(PathBuf::from("Config.toml"))))
            .merge(
                Env::raw()
                    .only(&["DATABASE_URL"])
                    .map(|_| "database.url".into()),
            )
            .merge(Env::prefixed("CONFIG_").split("__"))
            .extract()
    }

    /// Create new config suitable for running unit tests.
    #[cfg(feature = "test-utils")]
    pub fn for_tests() -> Self {
        Self {
            database: Database {
                url: String::from("sqlite::memory:"),
            },
            #[cfg(feature = "logging")]
            logging: Logging::default(),
            billing: Billing::default(),
        }
    }
}
