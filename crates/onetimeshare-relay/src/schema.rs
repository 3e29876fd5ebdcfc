//! Request and response shapes for the outer API layer

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SecretLimits;
use crate::error::{RelayError, Result};

/// Create request
///
/// The `encrypted_message` / `expire_minutes` aliases keep older clients working.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateSecretRequest {
    /// Client-encrypted payload
    #[serde(alias = "encrypted_message")]
    pub ciphertext: String,
    /// Lifetime in minutes; deployment default when omitted
    #[serde(default, alias = "expire_minutes")]
    pub ttl_minutes: Option<i64>,
    /// Permitted reads
    #[serde(default = "default_max_views")]
    pub max_views: i64,
    /// Contact notified once the secret is burned
    #[serde(default)]
    pub notify_target: Option<String>,
}

fn default_max_views() -> i64 {
    crate::DEFAULT_MAX_VIEWS as i64
}

impl CreateSecretRequest {
    /// Request with default ttl and a single view
    pub fn new(ciphertext: impl Into<String>) -> Self {
        Self {
            ciphertext: ciphertext.into(),
            ttl_minutes: None,
            max_views: default_max_views(),
            notify_target: None,
        }
    }

    /// Set the lifetime in minutes
    pub fn with_ttl_minutes(mut self, minutes: i64) -> Self {
        self.ttl_minutes = Some(minutes);
        self
    }

    /// Set the view budget
    pub fn with_max_views(mut self, max_views: i64) -> Self {
        self.max_views = max_views;
        self
    }

    /// Set the notification target
    pub fn with_notify_target(mut self, target: impl Into<String>) -> Self {
        self.notify_target = Some(target.into());
        self
    }

    /// Check bounds and normalize
    pub fn validate(self, limits: &SecretLimits) -> Result<ValidatedCreate> {
        if self.ciphertext.is_empty() {
            return Err(RelayError::Validation("ciphertext must not be empty".into()));
        }
        if self.ciphertext.len() > limits.max_ciphertext_bytes {
            return Err(RelayError::Validation(format!(
                "ciphertext is {} bytes, maximum is {}",
                self.ciphertext.len(),
                limits.max_ciphertext_bytes
            )));
        }

        let ttl_minutes = self.ttl_minutes.unwrap_or(limits.default_ttl_minutes as i64);
        if ttl_minutes <= 0 {
            return Err(RelayError::Validation("ttl_minutes must be positive".into()));
        }
        if ttl_minutes as u64 > limits.max_ttl_minutes {
            return Err(RelayError::Validation(format!(
                "ttl_minutes must be at most {}",
                limits.max_ttl_minutes
            )));
        }

        if self.max_views <= 0 {
            return Err(RelayError::Validation("max_views must be positive".into()));
        }
        if self.max_views > limits.max_views_limit as i64 {
            return Err(RelayError::Validation(format!(
                "max_views must be at most {}",
                limits.max_views_limit
            )));
        }

        let notify_target = self
            .notify_target
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        if let Some(target) = &notify_target {
            if target.len() > limits.max_notify_target_len {
                return Err(RelayError::Validation(format!(
                    "notify_target must be at most {} bytes",
                    limits.max_notify_target_len
                )));
            }
        }

        Ok(ValidatedCreate {
            ciphertext: self.ciphertext,
            ttl: Duration::from_secs(ttl_minutes as u64 * 60),
            max_views: self.max_views as u32,
            notify_target,
        })
    }
}

/// A create request that passed validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedCreate {
    /// Client-encrypted payload
    pub ciphertext: String,
    /// Lifetime of the record
    pub ttl: Duration,
    /// Permitted reads, at least one
    pub max_views: u32,
    /// Contact notified on burn
    pub notify_target: Option<String>,
}

/// Create response
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CreateSecretResponse {
    /// Token naming the new secret
    pub token: String,
}

/// Read response
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReadSecretResponse {
    /// Stored payload, exactly as submitted
    pub ciphertext: String,
}

/// Health response
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct HealthResponse {
    /// `"ok"` when the store answers
    pub status: String,
}

impl HealthResponse {
    /// Healthy response
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}
