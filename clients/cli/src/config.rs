//! CLI configuration

use onetimeshare_relay::RelayConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Identity this client is rate limited as
    pub client_identity: String,
    /// Relay settings
    pub relay: RelayConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            client_identity: "127.0.0.1".to_string(),
            relay: RelayConfig::default(),
        }
    }
}

impl CliConfig {
    /// Default location under the user's config directory
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("onetimeshare");
        path.push("config.toml");
        path
    }

    /// Load config from file, writing the defaults there on first use
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::parse(&content)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            config.save(path)?;

            Ok(config)
        }
    }

    /// Parse TOML content
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onetimeshare_relay::ReadMode;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = CliConfig::parse(
            r#"
            [relay]
            read_mode = "legacy"

            [relay.store]
            url = "redis://cache:6379/2"
            "#,
        )
        .unwrap();

        assert_eq!(config.client_identity, "127.0.0.1");
        assert_eq!(config.relay.read_mode, ReadMode::Legacy);
        assert_eq!(config.relay.store.url, "redis://cache:6379/2");
        assert_eq!(config.relay.store.key_prefix, "ots");
        assert_eq!(config.relay.admission.create.max_requests, 5);
    }

    #[test]
    fn test_default_config_survives_save_and_load() {
        let dir = std::env::temp_dir().join(format!("ots-cli-test-{}", std::process::id()));
        let path = dir.join("config.toml");

        let written = CliConfig::load_or_default(&path).unwrap();
        let loaded = CliConfig::load_or_default(&path).unwrap();
        assert_eq!(written.relay.store.url, loaded.relay.store.url);
        assert_eq!(written.relay.limits.max_ttl_minutes, loaded.relay.limits.max_ttl_minutes);

        let _ = std::fs::remove_dir_all(dir);
    }
}
