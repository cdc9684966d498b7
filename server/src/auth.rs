//! Access-token validation for the `Connect` handshake.
//!
//! DESIGN
//! ======
//! Validation is an injected capability consulted exactly once per
//! connection, before a client id is published in the broker tables. The
//! broker never issues tokens. The bundled [`StaticTokenValidator`] keeps
//! only SHA-256 digests of the configured tokens in memory.

use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::BrokerConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("access token required")]
    MissingToken,
    #[error("access token rejected")]
    InvalidToken,
}

impl frames::ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        frames::codes::UNAUTHORIZED
    }
}

/// Decides whether a connecting client may join the broker.
#[async_trait::async_trait]
pub trait AccessTokenValidator: Send + Sync {
    async fn validate(&self, client_id: &str, token: Option<&str>) -> Result<(), AuthError>;
}

/// Accepts any token in a fixed set.
pub struct StaticTokenValidator {
    digests: HashSet<String>,
}

impl StaticTokenValidator {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self { digests: tokens.into_iter().map(|t| hash_token(t.as_ref())).collect() }
    }
}

#[async_trait::async_trait]
impl AccessTokenValidator for StaticTokenValidator {
    async fn validate(&self, _client_id: &str, token: Option<&str>) -> Result<(), AuthError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;
        if self.digests.contains(&hash_token(token)) { Ok(()) } else { Err(AuthError::InvalidToken) }
    }
}

/// Validator implied by the config, `None` when no tokens are configured.
#[must_use]
pub fn validator_from_config(config: &BrokerConfig) -> Option<Arc<dyn AccessTokenValidator>> {
    if config.access_tokens.is_empty() {
        return None;
    }
    Some(Arc::new(StaticTokenValidator::new(&config.access_tokens)))
}

/// Hex SHA-256 digest of a token.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
