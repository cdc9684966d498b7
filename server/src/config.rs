//! Broker configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Deliver a default-scope publish back to the publisher when it is
    /// itself subscribed to the topic.
    pub echo_to_publisher: bool,
    /// How long a fresh connection may take to send `Connect`.
    pub handshake_timeout: Duration,
    /// Accepted access tokens. Empty disables token validation.
    pub access_tokens: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            echo_to_publisher: true,
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            access_tokens: Vec::new(),
        }
    }
}

impl BrokerConfig {
    /// Build typed broker config from environment variables.
    ///
    /// Optional:
    /// - `BROKER_HOST`: default `0.0.0.0`
    /// - `PORT`: default 3000
    /// - `BROKER_ECHO_TO_PUBLISHER`: `true` (default) or `false`
    /// - `BROKER_HANDSHAKE_TIMEOUT_SECS`: default 10
    /// - `BROKER_ACCESS_TOKENS`: comma-separated list, unset means open broker
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a variable is set but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`BrokerConfig::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a variable is set but unparsable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("BROKER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_owned());
        let port = parse_or("PORT", lookup("PORT"), DEFAULT_PORT)?;
        let echo_to_publisher = parse_bool("BROKER_ECHO_TO_PUBLISHER", lookup("BROKER_ECHO_TO_PUBLISHER"), true)?;
        let handshake_secs = parse_or(
            "BROKER_HANDSHAKE_TIMEOUT_SECS",
            lookup("BROKER_HANDSHAKE_TIMEOUT_SECS"),
            DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        )?;
        let access_tokens = lookup("BROKER_ACCESS_TOKENS")
            .map(|raw| parse_list(&raw))
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            echo_to_publisher,
            handshake_timeout: Duration::from_secs(handshake_secs),
            access_tokens,
        })
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_bool(key: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = raw else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
