use sha2::{Digest, Sha256};

use crate::config::AuthConfig;
use crate::error::{Result, SwarmError};

/// Connection-time token check. The expected token comes from config or the
/// `TRUSTSWARM_AUTH__TOKEN` environment variable; when neither is set the
/// server runs open, which is only sensible for local development.
#[derive(Debug, Clone, Default)]
pub struct TokenAuth {
    expected: Option<String>,
}

impl TokenAuth {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            expected: config
                .token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        }
    }

    pub fn open() -> Self {
        Self { expected: None }
    }

    pub fn required(&self) -> bool {
        self.expected.is_some()
    }

    pub fn is_valid(&self, provided: Option<&str>) -> bool {
        match &self.expected {
            None => true,
            Some(expected) => provided.map(str::trim).is_some_and(|t| t == expected),
        }
    }

    /// Check a presented token, yielding the auth error the transport layer
    /// maps to a 401.
    pub fn verify(&self, provided: Option<&str>) -> Result<()> {
        if self.is_valid(provided) {
            Ok(())
        } else {
            Err(SwarmError::Auth(
                "missing or invalid access token".to_string(),
            ))
        }
    }

    /// Stable fingerprint of the configured token, safe to log.
    pub fn fingerprint(&self) -> Option<String> {
        self.expected.as_deref().map(token_fingerprint)
    }
}

pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
