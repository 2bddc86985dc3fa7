// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment prefix for overrides, nested keys split on `__`
pub const ENV_PREFIX: &str = "ROOMSYNC_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub rooms: LifecycleSettings,
    pub transport: TransportSettings,
    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin; any origin when unset
    #[serde(default)]
    pub cors_origin: Option<String>,
}

/// Room lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleSettings {
    /// Delay between a room emptying and its eviction
    pub eviction_grace_ms: u64,
    /// Let `join` open a room that has no directory record yet
    pub allow_adhoc_rooms: bool,
}

/// Transport limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSettings {
    /// Largest chat payload accepted, in bytes
    pub max_message_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            rooms: LifecycleSettings::default(),
            transport: TransportSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            cors_origin: None,
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            eviction_grace_ms: 30_000,
            allow_adhoc_rooms: true,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_message_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Settings {
    /// Load settings from `config.toml` in the working directory and the environment
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment().merge(Toml::file("config.toml")))
    }

    /// Load settings from an explicit TOML file and the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        Self::from_figment(Self::figment().merge(Toml::file(path)))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let settings: Settings = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        if self.transport.max_message_bytes == 0 {
            bail!("transport.max_message_bytes must be non-zero");
        }
        if self.rooms.eviction_grace_ms == 0 {
            bail!("rooms.eviction_grace_ms must be non-zero");
        }
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            bail!("unknown log level: {}", self.log_level);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.server.host, self.server.port).parse()?)
    }

    pub fn eviction_grace(&self) -> Duration {
        Duration::from_millis(self.rooms.eviction_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3001);
        assert_eq!(settings.rooms.eviction_grace_ms, 30_000);
        assert!(settings.rooms.allow_adhoc_rooms);
        assert_eq!(settings.transport.max_message_bytes, 10 * 1024 * 1024);
        assert_eq!(settings.eviction_grace(), Duration::from_secs(30));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let settings = Settings::default();

        let mut invalid = settings.clone();
        invalid.log_level = "loud".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = settings.clone();
        invalid.server.port = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = settings.clone();
        invalid.transport.max_message_bytes = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = settings;
        invalid.rooms.eviction_grace_ms = 0;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("roomsync.toml");

        fs::write(
            &config_path,
            r#"
            log_level = "debug"

            [server]
            host = "0.0.0.0"
            port = 4100

            [rooms]
            eviction_grace_ms = 5000
            "#,
        )
        .unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 4100);
        assert_eq!(settings.rooms.eviction_grace_ms, 5000);
        // untouched sections keep their defaults
        assert!(settings.rooms.allow_adhoc_rooms);
        assert_eq!(settings.transport.max_message_bytes, 10 * 1024 * 1024);
        assert_eq!(settings.bind_addr().unwrap().to_string(), "0.0.0.0:4100");
    }

    #[test]
    fn test_load_from_missing_file() {
        assert!(Settings::load_from("/definitely/not/here.toml").is_err());
    }
}
