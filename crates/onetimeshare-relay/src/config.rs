//! Relay configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level relay configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Backing store
    pub store: StoreConfig,
    /// Input bounds for new secrets
    pub limits: SecretLimits,
    /// Rate limiting
    pub admission: AdmissionConfig,
    /// Burn notifications
    pub notify: NotifyConfig,
    /// Read semantics for this deployment
    pub read_mode: ReadMode,
}

impl RelayConfig {
    /// Build a configuration from defaults overlaid with environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Overlay values from an arbitrary variable lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REDIS_URL") {
            self.store.url = url;
        } else if let Some(host) = lookup("REDIS_HOST") {
            self.store.url = format!("redis://{}:6379/0", host);
        }
        if let Some(prefix) = lookup("OTS_KEY_PREFIX") {
            self.store.key_prefix = prefix;
        }
        if let Some(ms) = lookup("OTS_STORE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.store.timeout_ms = ms;
        }
        // DEFAULT_TTL is given in seconds.
        if let Some(secs) = lookup("DEFAULT_TTL").and_then(|v| v.parse::<u64>().ok()) {
            self.limits.default_ttl_minutes = (secs / 60).max(1);
        }
        if let Some(mode) = lookup("OTS_READ_MODE").and_then(|v| v.parse().ok()) {
            self.read_mode = mode;
        }
        if let Some(flag) = lookup("OTS_TRUST_FORWARDED_FOR") {
            self.admission.trust_forwarded_for = flag != "false" && flag != "0";
        }
        if let Some(n) = lookup("OTS_CREATE_LIMIT").and_then(|v| v.parse().ok()) {
            self.admission.create.max_requests = n;
        }
        if let Some(n) = lookup("OTS_READ_LIMIT").and_then(|v| v.parse().ok()) {
            self.admission.read.max_requests = n;
        }
        if let Some(url) = lookup("OTS_NOTIFY_WEBHOOK_URL") {
            self.notify.webhook_url = Some(url);
        }
        if let Some(secret) = lookup("OTS_NOTIFY_WEBHOOK_SECRET") {
            self.notify.signing_secret = Some(secret);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.store.url.is_empty() {
            return Err("store.url must not be empty".to_string());
        }
        if self.store.timeout_ms == 0 {
            return Err("store.timeout_ms must be > 0".to_string());
        }
        self.limits.validate()?;
        self.admission.create.validate("admission.create")?;
        self.admission.read.validate("admission.read")?;
        if self.notify.timeout_secs == 0 {
            return Err("notify.timeout_secs must be > 0".to_string());
        }
        Ok(())
    }
}

/// Store connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection URL (`redis://host:port/db`)
    pub url: String,
    /// Prefix for every key written; empty means bare tokens
    pub key_prefix: String,
    /// Upper bound for a single store call, in milliseconds
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            key_prefix: "ots".to_string(),
            timeout_ms: 2_000,
        }
    }
}

impl StoreConfig {
    /// Get the per-call timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Bounds applied to create requests
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretLimits {
    /// TTL used when the request omits one
    pub default_ttl_minutes: u64,
    /// Longest accepted TTL
    pub max_ttl_minutes: u64,
    /// Largest accepted view budget
    pub max_views_limit: u32,
    /// Largest accepted ciphertext, in bytes
    pub max_ciphertext_bytes: usize,
    /// Longest accepted notify target
    pub max_notify_target_len: usize,
}

impl Default for SecretLimits {
    fn default() -> Self {
        Self {
            default_ttl_minutes: crate::DEFAULT_TTL_MINUTES,
            max_ttl_minutes: 7 * 24 * 60,
            max_views_limit: 100,
            max_ciphertext_bytes: crate::MAX_CIPHERTEXT_SIZE,
            max_notify_target_len: 320,
        }
    }
}

impl SecretLimits {
    fn validate(&self) -> Result<(), String> {
        if self.default_ttl_minutes == 0 {
            return Err("limits.default_ttl_minutes must be > 0".to_string());
        }
        if self.default_ttl_minutes > self.max_ttl_minutes {
            return Err("limits.default_ttl_minutes exceeds limits.max_ttl_minutes".to_string());
        }
        if self.max_views_limit == 0 {
            return Err("limits.max_views_limit must be > 0".to_string());
        }
        if self.max_ciphertext_bytes == 0 {
            return Err("limits.max_ciphertext_bytes must be > 0".to_string());
        }
        Ok(())
    }
}

/// Admission controller settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Limit for the create endpoint
    pub create: RateLimitConfig,
    /// Limit for the read endpoint
    pub read: RateLimitConfig,
    /// Honor the forwarded-for header (only behind a trusted proxy)
    pub trust_forwarded_for: bool,
    /// Name of the forwarded-for header
    pub forwarded_for_header: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            create: RateLimitConfig::new(5, 60),
            read: RateLimitConfig::new(10, 60),
            trust_forwarded_for: true,
            forwarded_for_header: "x-forwarded-for".to_string(),
        }
    }
}

/// Fixed-window rate limit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    pub max_requests: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

impl RateLimitConfig {
    /// Create a limit of `max_requests` per `window_secs`
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    /// Get window as Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn validate(&self, name: &str) -> Result<(), String> {
        if self.max_requests == 0 {
            return Err(format!("{}.max_requests must be > 0", name));
        }
        if self.window_secs == 0 {
            return Err(format!("{}.window_secs must be > 0", name));
        }
        Ok(())
    }
}

/// Burn notification settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook receiving `secret.burned` events; unset means log-only
    pub webhook_url: Option<String>,
    /// HMAC key for signing webhook bodies
    pub signing_secret: Option<String>,
    /// Upper bound for one delivery attempt
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            signing_secret: None,
            timeout_secs: 5,
        }
    }
}

impl NotifyConfig {
    /// Get delivery timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which read semantics a deployment serves.
///
/// The two modes store records differently and must not share a key space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// View-counted records; single-view records use fetch-and-delete
    #[default]
    Counted,
    /// Every record is a raw blob consumed by one fetch-and-delete
    Legacy,
}

impl std::str::FromStr for ReadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "counted" => Ok(ReadMode::Counted),
            "legacy" => Ok(ReadMode::Legacy),
            other => Err(format!("unknown read mode: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.admission.create, RateLimitConfig::new(5, 60));
        assert_eq!(config.admission.read, RateLimitConfig::new(10, 60));
        assert_eq!(config.read_mode, ReadMode::Counted);
    }

    #[test]
    fn test_apply_env() {
        let vars: HashMap<&str, &str> = [
            ("REDIS_HOST", "cache"),
            ("DEFAULT_TTL", "900"),
            ("OTS_READ_MODE", "legacy"),
            ("OTS_TRUST_FORWARDED_FOR", "false"),
            ("OTS_READ_LIMIT", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = RelayConfig::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.store.url, "redis://cache:6379/0");
        assert_eq!(config.limits.default_ttl_minutes, 15);
        assert_eq!(config.read_mode, ReadMode::Legacy);
        assert!(!config.admission.trust_forwarded_for);
        assert_eq!(config.admission.read.max_requests, 3);
    }

    #[test]
    fn test_redis_url_wins_over_host() {
        let mut config = RelayConfig::default();
        config.apply_env(|k| match k {
            "REDIS_URL" => Some("redis://primary:6380/2".to_string()),
            "REDIS_HOST" => Some("ignored".to_string()),
            _ => None,
        });
        assert_eq!(config.store.url, "redis://primary:6380/2");
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = RelayConfig::default();
        config.admission.read.window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: RelayConfig =
            serde_json::from_str(r#"{"read_mode":"legacy","store":{"key_prefix":""}}"#).unwrap();
        assert_eq!(config.read_mode, ReadMode::Legacy);
        assert_eq!(config.store.key_prefix, "");
        assert_eq!(config.store.timeout_ms, 2_000);
        assert_eq!(config.limits.max_views_limit, 100);
    }
}
