//! Configuration file handling
//!
//! Everything has a default, so an empty or missing file is a valid config.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MONITOR_HTTP_PORT, DEFAULT_MONITOR_PORT};
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub listener: ListenerConfig,
    pub audio: AudioConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub bind_address: IpAddr,
    /// First port tried; later ones are tried in order when it is taken
    pub base_port: u16,
    /// Used in the advertised service name
    pub device_model: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            base_port: DEFAULT_MONITOR_PORT,
            device_model: default_device_model(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub connect_timeout_ms: u64,
}

impl ListenerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name, system default when unset
    pub input_device: Option<String>,
    /// Output device name, system default when unset
    pub output_device: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: IpAddr,
    /// Overridden per role on the command line
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: DEFAULT_MONITOR_HTTP_PORT,
        }
    }
}

impl AppConfig {
    /// Load from `path`, else the per-user config file, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    tracing::debug!("No config file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// `config.toml` in the platform's per-user config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "childmonitor", "child-monitor")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

fn default_device_model() -> String {
    std::env::consts::OS.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_device_model_defaults_to_os_name() {
        assert_eq!(MonitorConfig::default().device_model, std::env::consts::OS);
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let file = write_config("");
        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.monitor.base_port, 10000);
        assert_eq!(config.listener.connect_timeout(), Duration::from_secs(10));
        assert!(config.ui.enabled);
        assert!(config.audio.input_device.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let file = write_config(
            r#"
            [monitor]
            base_port = 12000
            device_model = "Nursery"

            [audio]
            output_device = "USB Speaker"
            "#,
        );
        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.monitor.base_port, 12000);
        assert_eq!(config.monitor.device_model, "Nursery");
        assert_eq!(config.monitor.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.audio.output_device.as_deref(), Some("USB Speaker"));
        assert_eq!(config.listener, ListenerConfig::default());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = AppConfig::default();
        config.listener.connect_timeout_ms = 2500;
        config.ui.enabled = false;

        let text = toml::to_string(&config).unwrap();
        let file = write_config(&text);
        assert_eq!(AppConfig::load(Some(file.path())).unwrap(), config);
    }

    #[test]
    fn test_parse_error_names_file() {
        let file = write_config("[monitor]\nbase_port = \"high\"\n");
        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
