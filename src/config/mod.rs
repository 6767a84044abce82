//! Configuration module for turbine-rs
//!
//! A [`ClientConfig`] carries everything a client needs before it connects:
//! the server address, the client name and credentials, the ring buffer
//! settings of a source, the default fetch timeout and the logging setup.
//!
//! # Config Location
//!
//! The default file lives in the platform configuration directory:
//! - **Linux**: `~/.config/turbine-rs/client.toml`
//! - **macOS**: `~/Library/Application Support/turbine-rs/client.toml`
//! - **Windows**: `%APPDATA%\turbine-rs\client.toml`
//!
//! Files ending in `.json` are read and written as JSON, everything else as
//! TOML.
//!
//! # Example
//!
//! ```
//! use turbine_rs::config::ClientConfig;
//!
//! let mut config: ClientConfig = toml::from_str(r#"
//!     server_address = "daq01:3333"
//!     client_name = "Pressure"
//!
//!     [ring_buffer]
//!     cache_frames = 500
//! "#).unwrap();
//! config.apply_env();
//! config.validate().unwrap();
//! assert_eq!(config.ring_buffer.cache_frames, 500);
//! ```

use crate::client::{Credentials, FetchTimeout, RingBuffer, DEFAULT_CLIENT_NAME, DEFAULT_SERVER_ADDRESS};
use crate::error::{Result, TurbineError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory below the platform config dir
pub const APP_DIR: &str = "turbine-rs";

/// Default config filename
pub const CONFIG_FILE: &str = "client.toml";

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "info,turbine_rs=debug";

/// Default fetch timeout in milliseconds
pub const DEFAULT_FETCH_TIMEOUT_MS: i64 = 1000;

/// Environment variable overriding [`ClientConfig::server_address`]
pub const ENV_SERVER_ADDRESS: &str = "TURBINE_SERVER_ADDRESS";

/// Environment variable overriding [`ClientConfig::client_name`]
pub const ENV_CLIENT_NAME: &str = "TURBINE_CLIENT_NAME";

/// Environment variable overriding the ring buffer cache size
pub const ENV_CACHE_FRAMES: &str = "TURBINE_CACHE_FRAMES";

/// Path of the default config file, if the platform has a config dir.
pub fn default_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Toml,
        }
    }
}

/// Client connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of the server
    pub server_address: String,

    /// Name the client registers under
    pub client_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Default fetch timeout: negative waits forever, zero polls
    pub fetch_timeout_ms: i64,

    /// `tracing` filter directive
    pub log_filter: String,

    /// Directory for daily log files; console only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Cache and archive of a source
    pub ring_buffer: RingBuffer,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            username: None,
            password: None,
            ring_buffer: RingBuffer::default(),
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
        }
    }
}

impl ClientConfig {
    /// Load a config file, TOML or JSON by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TurbineError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;
        let config: Self = match Format::of(path) {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };
        config.validate()?;
        tracing::debug!("Loaded client config from {:?}", path);
        Ok(config)
    }

    /// Load the config at [`default_path`], returning defaults on any error.
    pub fn load_or_default() -> Self {
        let Some(path) = default_path().filter(|p| p.exists()) else {
            return Self::default();
        };
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load client config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                TurbineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
        let content = match Format::of(path) {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };
        std::fs::write(path, content)
            .map_err(|e| TurbineError::Config(format!("Failed to write config {:?}: {}", path, e)))
    }

    /// Override fields from the `TURBINE_*` environment variables. Values
    /// that do not parse are ignored with a warning.
    pub fn apply_env(&mut self) {
        if let Ok(address) = std::env::var(ENV_SERVER_ADDRESS) {
            self.server_address = address;
        }
        if let Ok(name) = std::env::var(ENV_CLIENT_NAME) {
            self.client_name = name;
        }
        if let Ok(frames) = std::env::var(ENV_CACHE_FRAMES) {
            match frames.trim().parse::<u64>() {
                Ok(frames) => self.ring_buffer.cache_frames = frames,
                Err(e) => tracing::warn!("Ignoring {}={:?}: {}", ENV_CACHE_FRAMES, frames, e),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_address.trim().is_empty() {
            return Err(TurbineError::Config("server_address must not be empty".into()));
        }
        if self.client_name.is_empty() || self.client_name.contains('/') {
            return Err(TurbineError::Config(format!(
                "client_name {:?} must be non-empty and free of slashes",
                self.client_name
            )));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(TurbineError::Config(
                "username and password must be given together".into(),
            ));
        }
        self.ring_buffer
            .validate()
            .map_err(|e| TurbineError::Config(e.to_string()))
    }

    /// Credentials, when both username and password are set.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn fetch_timeout(&self) -> FetchTimeout {
        FetchTimeout::from_millis(self.fetch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ArchiveMode;
    use serial_test::serial;
    use tempfile::TempDir;

    fn sample() -> ClientConfig {
        ClientConfig {
            server_address: "daq01:3333".into(),
            client_name: "Pressure".into(),
            username: Some("ops".into()),
            password: Some("secret".into()),
            ring_buffer: RingBuffer::new(500, "create", 10_000).unwrap(),
            fetch_timeout_ms: -1,
            log_filter: "warn".into(),
            log_dir: Some(PathBuf::from("/var/log/turbine")),
        }
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_address, "localhost:3333");
        assert_eq!(config.client_name, "MyClient");
        assert_eq!(config.ring_buffer.cache_frames, 100);
        assert!(config.credentials().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("client.toml");
        let config = sample();
        config.save(&path).unwrap();
        assert_eq!(ClientConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.json");
        let config = sample();
        config.save(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.trim_start().starts_with('{'));
        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded.ring_buffer.archive_mode, ArchiveMode::Create);
        assert_eq!(loaded.fetch_timeout(), FetchTimeout::Forever);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: ClientConfig = toml::from_str("client_name = \"Wind\"").unwrap();
        assert_eq!(config.client_name, "Wind");
        assert_eq!(config.server_address, "localhost:3333");
        assert_eq!(config.fetch_timeout_ms, DEFAULT_FETCH_TIMEOUT_MS);
    }

    #[test]
    fn test_validation() {
        let mut config = ClientConfig::default();
        config.client_name = "a/b".into();
        assert!(matches!(config.validate(), Err(TurbineError::Config(_))));

        let mut config = ClientConfig::default();
        config.ring_buffer.cache_frames = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.username = Some("ops".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(ClientConfig::load(dir.path().join("absent.toml")).is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(ENV_SERVER_ADDRESS, "env-host:4444");
        std::env::set_var(ENV_CACHE_FRAMES, "250");
        std::env::set_var(ENV_CLIENT_NAME, "FromEnv");
        let mut config = ClientConfig::default();
        config.apply_env();
        std::env::remove_var(ENV_SERVER_ADDRESS);
        std::env::remove_var(ENV_CACHE_FRAMES);
        std::env::remove_var(ENV_CLIENT_NAME);

        assert_eq!(config.server_address, "env-host:4444");
        assert_eq!(config.client_name, "FromEnv");
        assert_eq!(config.ring_buffer.cache_frames, 250);
    }

    #[test]
    #[serial]
    fn test_env_ignores_bad_numbers() {
        std::env::set_var(ENV_CACHE_FRAMES, "lots");
        let mut config = ClientConfig::default();
        config.apply_env();
        std::env::remove_var(ENV_CACHE_FRAMES);
        assert_eq!(config.ring_buffer.cache_frames, 100);
    }
}
