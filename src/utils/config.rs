use crate::chain::ReceiptSettings;
use crate::driver::{DistributionSettings, DriverSettings, DEFAULT_GAS_BUFFER_PERCENT};
use crate::error::{BulkError, ConfigError, Result};
use alloy::primitives::Address;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_BALANCE_QUERY_CONCURRENCY: usize = 16;
pub const DEFAULT_REPORT_DIR: &str = "reports";

const MAX_GAS_BUFFER_PERCENT: u64 = 100;
const MAX_BALANCE_QUERY_CONCURRENCY: usize = 256;

/// Process configuration, read once from the environment.
///
/// Connection settings are optional at load time; each command asks for the
/// ones it needs through the `require_*` accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub token_address: Option<Address>,
    pub bulk_sender_address: Option<Address>,
    pub batch_size: usize,
    pub gas_buffer_percent: u64,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub sampling_verification: bool,
    pub balance_query_concurrency: usize,
    pub report_dir: PathBuf,
}

pub(crate) fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn validate_http_url(name: &str, raw: &str) -> Result<()> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        ConfigError::InvalidConfig(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidConfig(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))
        .into()),
    }
}

fn validate_private_key(raw: &str) -> Result<()> {
    let trimmed = raw.trim().trim_start_matches("0x");
    let hexish = trimmed.len() == 64 && trimmed.as_bytes().iter().all(|b| b.is_ascii_hexdigit());
    if !hexish {
        return Err(ConfigError::InvalidConfig(
            "PRIVATE_KEY must be 32 bytes of hex (optionally 0x-prefixed)".to_string(),
        )
        .into());
    }
    Ok(())
}

struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn text(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn address(&self, name: &str) -> Result<Option<Address>> {
        self.text(name)
            .map(|raw| {
                Address::from_str(&raw).map_err(|err| {
                    BulkError::from(ConfigError::InvalidConfig(format!(
                        "{name} must be an address, got `{raw}`: {err}"
                    )))
                })
            })
            .transpose()
    }

    fn number<T>(&self, name: &str, default: T, min: T, max: T) -> Result<T>
    where
        T: FromStr + PartialOrd + Copy + std::fmt::Display,
    {
        let Some(raw) = self.text(name) else {
            return Ok(default);
        };
        let value = raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidConfig(format!("{name} must be a number, got `{raw}`"))
        })?;
        if value < min || value > max {
            return Err(ConfigError::InvalidConfig(format!(
                "{name} must be within {min}..={max}, got {value}"
            ))
            .into());
        }
        Ok(value)
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool> {
        match self.text(name) {
            None => Ok(default),
            Some(raw) => parse_bool_flag(&raw).ok_or_else(|| {
                ConfigError::InvalidConfig(format!("{name} must be a boolean, got `{raw}`")).into()
            }),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup };

        let rpc_url = source.text("RPC_URL");
        if let Some(url) = rpc_url.as_deref() {
            validate_http_url("RPC_URL", url)?;
        }
        let private_key = source.text("PRIVATE_KEY");
        if let Some(key) = private_key.as_deref() {
            validate_private_key(key)?;
        }

        Ok(Self {
            rpc_url,
            private_key,
            token_address: source.address("TOKEN_ADDRESS")?,
            bulk_sender_address: source.address("BULK_SENDER_ADDRESS")?,
            batch_size: source.number("BATCH_SIZE", DEFAULT_BATCH_SIZE, 1, usize::MAX)?,
            gas_buffer_percent: source.number(
                "GAS_BUFFER_PERCENT",
                DEFAULT_GAS_BUFFER_PERCENT,
                0,
                MAX_GAS_BUFFER_PERCENT,
            )?,
            confirmation_timeout: Duration::from_secs(source.number(
                "CONFIRMATION_TIMEOUT_SECS",
                DEFAULT_CONFIRMATION_TIMEOUT_SECS,
                1,
                u64::MAX,
            )?),
            receipt_poll_interval: Duration::from_millis(source.number(
                "RECEIPT_POLL_INTERVAL_MS",
                DEFAULT_RECEIPT_POLL_INTERVAL_MS,
                1,
                u64::MAX,
            )?),
            sampling_verification: source.flag("SAMPLING_VERIFICATION", true)?,
            balance_query_concurrency: source.number(
                "BALANCE_QUERY_CONCURRENCY",
                DEFAULT_BALANCE_QUERY_CONCURRENCY,
                1,
                MAX_BALANCE_QUERY_CONCURRENCY,
            )?,
            report_dir: source
                .text("REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_DIR)),
        })
    }

    pub fn require_rpc_url(&self) -> Result<&str> {
        required(self.rpc_url.as_deref(), "RPC_URL")
    }

    pub fn require_private_key(&self) -> Result<&str> {
        required(self.private_key.as_deref(), "PRIVATE_KEY")
    }

    pub fn require_token_address(&self) -> Result<Address> {
        required(self.token_address, "TOKEN_ADDRESS")
    }

    pub fn require_bulk_sender_address(&self) -> Result<Address> {
        required(self.bulk_sender_address, "BULK_SENDER_ADDRESS")
    }

    pub fn receipt_settings(&self) -> ReceiptSettings {
        ReceiptSettings {
            timeout: self.confirmation_timeout,
            poll_interval: self.receipt_poll_interval,
        }
    }

    pub fn distribution_settings(&self) -> DistributionSettings {
        DistributionSettings {
            batch_size: self.batch_size,
            driver: DriverSettings {
                gas_buffer_percent: self.gas_buffer_percent,
                sampling: self.sampling_verification,
            },
        }
    }
}

fn required<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| ConfigError::MissingConfig(format!("{name} must be set")).into())
}
