//! Bridge configuration
//!
//! Values come from three layers, weakest first: built-in defaults, an
//! optional TOML file (explicit path or `<config_dir>/domusbridge/
//! config.toml`), and the `MQTT_BROKER` / `MQTT_PORT` / `MQTT_TOPIC`
//! environment overrides. A missing file falls back to defaults; a file or
//! override that fails to parse is an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_BROKER: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TOPIC: &str = "iot/devices";

const CONFIG_DIR_NAME: &str = "domusbridge";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config file: {0}")]
    ParseError(String),

    #[error("Invalid environment override: {0}")]
    EnvError(String),
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Always-on subscription kept alongside the plugin patterns
    pub default_topic: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: DEFAULT_BROKER.to_string(),
            port: DEFAULT_PORT,
            client_id: "domusbridge".to_string(),
            username: None,
            password: None,
            default_topic: DEFAULT_TOPIC.to_string(),
            keep_alive_secs: 5,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt: MqttSettings,
    pub plugin_dir: PathBuf,
    pub heartbeat_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttSettings::default(),
            plugin_dir: PathBuf::from("plugins"),
            heartbeat_interval_secs: 10,
            connect_timeout_secs: 10,
            shutdown_grace_secs: 5,
        }
    }
}

impl BridgeConfig {
    /// Loads configuration, file below environment overrides
    ///
    /// An explicitly named file must exist; the well-known location may be
    /// absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = explicit {
            Self::from_file(path)?
        } else {
            match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                Some(path) => {
                    debug!("No config file at {}, using defaults", path.display());
                    Self::default()
                }
                None => Self::default(),
            }
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(broker) = std::env::var("MQTT_BROKER") {
            info!("Broker overridden from environment: {}", broker);
            self.mqtt.broker = broker;
        }
        if let Ok(port) = std::env::var("MQTT_PORT") {
            self.mqtt.port = port.parse().map_err(|_| {
                ConfigError::EnvError(format!("MQTT_PORT is not a valid port: {}", port))
            })?;
        }
        if let Ok(topic) = std::env::var("MQTT_TOPIC") {
            info!("Default topic overridden from environment: {}", topic);
            self.mqtt.default_topic = topic;
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Environment variables are process-global; serialize the tests that
    // touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_clean_env<T>(f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        std::env::remove_var("MQTT_BROKER");
        std::env::remove_var("MQTT_PORT");
        std::env::remove_var("MQTT_TOPIC");
        f()
    }

    #[test]
    fn defaults_point_at_a_local_broker() {
        let config = BridgeConfig::default();
        assert_eq!(config.mqtt.broker, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.default_topic, "iot/devices");
    }

    #[test]
    fn file_values_survive_loading() {
        with_clean_env(|| {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("config.toml");
            std::fs::write(
                &path,
                r#"
plugin_dir = "/opt/plugins"
heartbeat_interval_secs = 3

[mqtt]
broker = "10.0.0.2"
port = 1884
default_topic = "home/devices"
"#,
            )
            .unwrap();

            let config = BridgeConfig::load(Some(&path)).unwrap();
            assert_eq!(config.mqtt.broker, "10.0.0.2");
            assert_eq!(config.mqtt.port, 1884);
            assert_eq!(config.mqtt.default_topic, "home/devices");
            assert_eq!(config.plugin_dir, PathBuf::from("/opt/plugins"));
            assert_eq!(config.heartbeat_interval(), Duration::from_secs(3));
            // Untouched keys keep their defaults
            assert_eq!(config.mqtt.keep_alive_secs, 5);
            assert_eq!(config.shutdown_grace_secs, 5);
        });
    }

    #[test]
    fn env_overrides_beat_the_file() {
        with_clean_env(|| {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("config.toml");
            std::fs::write(&path, "[mqtt]\nbroker = \"from-file\"\n").unwrap();

            std::env::set_var("MQTT_BROKER", "from-env");
            std::env::set_var("MQTT_PORT", "2883");
            std::env::set_var("MQTT_TOPIC", "env/devices");
            let config = BridgeConfig::load(Some(&path));
            std::env::remove_var("MQTT_BROKER");
            std::env::remove_var("MQTT_PORT");
            std::env::remove_var("MQTT_TOPIC");

            let config = config.unwrap();
            assert_eq!(config.mqtt.broker, "from-env");
            assert_eq!(config.mqtt.port, 2883);
            assert_eq!(config.mqtt.default_topic, "env/devices");
        });
    }

    #[test]
    fn malformed_env_port_is_an_error() {
        with_clean_env(|| {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("config.toml");
            std::fs::write(&path, "").unwrap();

            std::env::set_var("MQTT_PORT", "not-a-port");
            let result = BridgeConfig::load(Some(&path));
            std::env::remove_var("MQTT_PORT");

            assert!(matches!(result, Err(ConfigError::EnvError(_))));
        });
    }

    #[test]
    fn malformed_file_is_an_error() {
        with_clean_env(|| {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("config.toml");
            std::fs::write(&path, "mqtt = [broken").unwrap();

            assert!(matches!(
                BridgeConfig::load(Some(&path)),
                Err(ConfigError::ParseError(_))
            ));
        });
    }

    #[test]
    fn explicitly_named_missing_file_is_an_error() {
        with_clean_env(|| {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("nope.toml");
            assert!(matches!(
                BridgeConfig::load(Some(&path)),
                Err(ConfigError::ReadError(_))
            ));
        });
    }
}
