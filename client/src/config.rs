//! Client options parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_INVOKE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Broker WebSocket URL, used by [`crate::Client::websocket`].
    pub url: String,
    /// Sent in `Connect` when the broker validates tokens.
    pub access_token: Option<String>,
    /// Upper bound on transport setup plus the `Connect` handshake.
    pub connect_timeout: Duration,
    /// Used by `invoke` when the call does not name its own timeout.
    pub invoke_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            access_token: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            invoke_timeout: Duration::from_secs(DEFAULT_INVOKE_TIMEOUT_SECS),
        }
    }
}

impl ClientOptions {
    /// Build client options from environment variables.
    ///
    /// Optional:
    /// - `BROKER_URL`: default `ws://127.0.0.1:3000/ws`
    /// - `BROKER_ACCESS_TOKEN`
    /// - `BROKER_CONNECT_TIMEOUT_SECS`: default 10
    /// - `BROKER_INVOKE_TIMEOUT_SECS`: default 30
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a timeout is set but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientOptions::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a timeout is set but unparsable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup("BROKER_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_owned());
        let access_token = lookup("BROKER_ACCESS_TOKEN").filter(|s| !s.is_empty());
        let connect_secs = parse_secs(&lookup, "BROKER_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?;
        let invoke_secs = parse_secs(&lookup, "BROKER_INVOKE_TIMEOUT_SECS", DEFAULT_INVOKE_TIMEOUT_SECS)?;

        Ok(Self {
            url,
            access_token,
            connect_timeout: Duration::from_secs(connect_secs),
            invoke_timeout: Duration::from_secs(invoke_secs),
        })
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }
}

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
