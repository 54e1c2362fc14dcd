//! Environment-backed runtime configuration for `kindled-smoke`.

use std::{env, error::Error, fmt, time::Duration};

use url::Url;

const DEFAULT_API_URL: &str = "https://api.kindled.example/api/";
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_MESSAGE_WINDOW: u16 = 50;

/// Runtime configuration used by the smoke binary.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    /// Base API URL every endpoint is joined under.
    pub api_url: Url,
    /// Bearer token seeded into the session vault, when provided.
    pub access_token: Option<String>,
    /// Cached user record JSON seeded into the session vault, when provided.
    pub cached_user: Option<String>,
    /// Steady-state thread refetch cadence.
    pub poll_interval: Duration,
    /// Most-recent messages requested per thread fetch.
    pub message_window: u16,
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
        let api_url = optional_trimmed_env("KINDLED_API_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_API_URL.to_owned());
        let api_url = Url::parse(&api_url).map_err(|err| ConfigError::InvalidValue {
            key: "KINDLED_API_URL",
            value: api_url.clone(),
            reason: err.to_string(),
        })?;

        let access_token = optional_trimmed_env("KINDLED_ACCESS_TOKEN", &mut lookup);
        let cached_user = optional_trimmed_env("KINDLED_CACHED_USER", &mut lookup);

        let poll_interval_ms = parse_optional_u64(
            "KINDLED_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
            &mut lookup,
        )?;
        let message_window = parse_optional_u16(
            "KINDLED_MESSAGE_WINDOW",
            DEFAULT_MESSAGE_WINDOW,
            &mut lookup,
        )?;

        if poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "KINDLED_POLL_INTERVAL_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if message_window == 0 {
            return Err(ConfigError::InvalidValue {
                key: "KINDLED_MESSAGE_WINDOW",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            api_url,
            access_token,
            cached_user,
            poll_interval: Duration::from_millis(poll_interval_ms),
            message_window,
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

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u16<F>(
    key: &'static str,
    default: u16,
    lookup: &mut F,
) -> Result<u16, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<u16>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
