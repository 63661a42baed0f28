//! Environment-backed runtime configuration for `courier-smoke`.

use std::{env, error::Error, fmt, time::Duration};

use courier_client::ClientConfig;
use courier_core::{DownloadConfig, RetryPolicy};

const DEFAULT_SEED_MESSAGES: usize = 12;
const DEFAULT_IDLE_EXIT_MS: u64 = 1_500;

/// Runtime configuration used by the smoke driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// Tuning forwarded to [`courier_client::ChatClient::start`].
    pub client: ClientConfig,
    /// History messages the loopback backend seeds per chat.
    pub seed_messages: usize,
    /// Exit once no UI wake-up arrives for this long.
    pub idle_exit: Duration,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = ClientConfig::default();
        let download_defaults = DownloadConfig::default();
        let retry_defaults = download_defaults.retry_policy;

        let max_retries = parse_or(
            "COURIER_MAX_RETRIES",
            download_defaults.max_retries,
            &mut lookup,
        )?;
        let timeout_secs = parse_positive(
            "COURIER_DOWNLOAD_TIMEOUT_SECS",
            download_defaults.timeout.as_secs(),
            &mut lookup,
        )?;
        let sweep_interval_secs = parse_positive(
            "COURIER_SWEEP_INTERVAL_SECS",
            download_defaults.sweep_interval.as_secs(),
            &mut lookup,
        )?;
        let retry_base_ms = parse_positive(
            "COURIER_RETRY_BASE_MS",
            retry_defaults.base_delay_ms(),
            &mut lookup,
        )?;
        let retry_max_ms = parse_positive(
            "COURIER_RETRY_MAX_MS",
            retry_defaults.max_delay_ms(),
            &mut lookup,
        )?;
        let max_concurrent = parse_positive(
            "COURIER_MAX_CONCURRENT_DOWNLOADS",
            download_defaults.max_concurrent,
            &mut lookup,
        )?;
        let high_priority_threshold = parse_positive(
            "COURIER_HIGH_PRIORITY_THRESHOLD",
            download_defaults.high_priority_threshold,
            &mut lookup,
        )?;
        let max_tracked_entries = parse_positive(
            "COURIER_MAX_TRACKED_DOWNLOADS",
            download_defaults.max_tracked_entries,
            &mut lookup,
        )?;
        let poll_timeout_ms = parse_positive(
            "COURIER_POLL_TIMEOUT_MS",
            defaults.poll_timeout.as_millis() as u64,
            &mut lookup,
        )?;
        let history_page_size = parse_positive(
            "COURIER_HISTORY_PAGE_SIZE",
            defaults.history_page_size,
            &mut lookup,
        )?;
        let max_messages_per_chat = parse_positive(
            "COURIER_MAX_MESSAGES_PER_CHAT",
            defaults.max_messages_per_chat,
            &mut lookup,
        )?;
        let seed_messages = parse_or(
            "COURIER_SMOKE_SEED_MESSAGES",
            DEFAULT_SEED_MESSAGES,
            &mut lookup,
        )?;
        let idle_exit_ms = parse_positive(
            "COURIER_SMOKE_IDLE_EXIT_MS",
            DEFAULT_IDLE_EXIT_MS,
            &mut lookup,
        )?;

        if retry_max_ms < retry_base_ms {
            return Err(ConfigError::InvalidValue {
                key: "COURIER_RETRY_MAX_MS",
                value: retry_max_ms.to_string(),
                reason: format!("must be at least COURIER_RETRY_BASE_MS ({retry_base_ms})"),
            });
        }

        Ok(Self {
            client: ClientConfig {
                poll_timeout: Duration::from_millis(poll_timeout_ms),
                history_page_size,
                max_messages_per_chat,
                downloads: DownloadConfig {
                    max_retries,
                    timeout: Duration::from_secs(timeout_secs),
                    sweep_interval: Duration::from_secs(sweep_interval_secs),
                    retry_policy: RetryPolicy::new(retry_base_ms, retry_max_ms),
                    max_concurrent,
                    high_priority_threshold,
                    max_tracked_entries,
                },
                auto_download: defaults.auto_download,
            },
            seed_messages,
            idle_exit: Duration::from_millis(idle_exit_ms),
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn parse_or<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key).map(|value| value.trim().to_owned()) else {
        return Ok(default);
    };
    if value.is_empty() {
        return Ok(default);
    }
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn parse_positive<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq + fmt::Display,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let parsed = parse_or(key, default, lookup)?;
    if parsed == T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value: parsed.to_string(),
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(parsed)
}
