//! Built-in thermostat control
//!
//! Listens under `domus/devices/thermostat/#` for plain-text setpoint
//! commands of the form `set_temp:<int>`. Requested temperatures are checked
//! against the bounds configured in the unit's manifest; out-of-bounds
//! requests are dropped with a warning.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::plugin::manifest::PluginManifest;
use crate::plugin::{IotPlugin, PluginError};
use crate::topic::TopicFilter;

const THERMOSTAT_TOPIC_PATTERN: &str = "domus/devices/thermostat/#";

const DEFAULT_MIN_TEMP: i64 = 5;
const DEFAULT_MAX_TEMP: i64 = 35;

// Sentinel for "no setpoint received yet"
const NO_SETPOINT: i64 = i64::MIN;

pub struct ThermostatPlugin {
    name: String,
    filter: TopicFilter,
    min_temp: i64,
    max_temp: i64,
    setpoint: AtomicI64,
}

impl ThermostatPlugin {
    pub fn from_manifest(manifest: &PluginManifest) -> Result<Self, PluginError> {
        let filter = TopicFilter::parse(THERMOSTAT_TOPIC_PATTERN)
            .map_err(|e| PluginError::ConfigError(format!("Failed to compile pattern: {}", e)))?;
        let (min_temp, max_temp) = match manifest.limits {
            Some(limits) => (limits.min_temp, limits.max_temp),
            None => (DEFAULT_MIN_TEMP, DEFAULT_MAX_TEMP),
        };
        Ok(Self {
            name: manifest
                .name
                .clone()
                .unwrap_or_else(|| "thermostat".to_string()),
            filter,
            min_temp,
            max_temp,
            setpoint: AtomicI64::new(NO_SETPOINT),
        })
    }

    /// The last accepted setpoint, if any command has been applied
    pub fn setpoint(&self) -> Option<i64> {
        match self.setpoint.load(Ordering::Relaxed) {
            NO_SETPOINT => None,
            value => Some(value),
        }
    }
}

#[async_trait]
impl IotPlugin for ThermostatPlugin {
    async fn initialize(&self) -> Result<(), PluginError> {
        if self.min_temp > self.max_temp {
            return Err(PluginError::InitializationError(format!(
                "Temperature bounds are inverted: {} > {}",
                self.min_temp, self.max_temp
            )));
        }
        info!(
            "Initializing thermostat plugin '{}' with bounds {} to {}",
            self.name, self.min_temp, self.max_temp
        );
        Ok(())
    }

    fn can_handle_topic(&self, topic: &str) -> bool {
        self.filter.matches(topic)
    }

    fn get_topics(&self) -> Vec<String> {
        vec![THERMOSTAT_TOPIC_PATTERN.to_string()]
    }

    async fn process_message(&self, topic: &str, payload: &[u8]) -> Result<(), PluginError> {
        let command = std::str::from_utf8(payload).map_err(|e| {
            PluginError::PayloadError(format!("Thermostat payload is not valid UTF-8: {}", e))
        })?;

        let Some(raw_temp) = command.strip_prefix("set_temp:") else {
            warn!("Unrecognized thermostat command '{}' on {}", command, topic);
            return Ok(());
        };

        let temp: i64 = raw_temp.parse().map_err(|_| {
            PluginError::PayloadError(format!("Invalid temperature value: {}", command))
        })?;

        if temp < self.min_temp || temp > self.max_temp {
            warn!(
                "Requested temperature {} outside bounds {} to {}",
                temp, self.min_temp, self.max_temp
            );
            return Ok(());
        }

        self.setpoint.store(temp, Ordering::Relaxed);
        info!("Setting thermostat to {}°C", temp);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        info!("Shutting down thermostat plugin '{}'", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::manifest::ManifestLimits;

    fn plugin_with_limits(min_temp: i64, max_temp: i64) -> ThermostatPlugin {
        ThermostatPlugin::from_manifest(&PluginManifest {
            kind: "thermostat".to_string(),
            limits: Some(ManifestLimits { min_temp, max_temp }),
            ..PluginManifest::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn applies_an_in_bounds_setpoint() {
        let thermostat = plugin_with_limits(5, 30);
        assert_eq!(thermostat.setpoint(), None);

        thermostat
            .process_message("domus/devices/thermostat/hall", b"set_temp:21")
            .await
            .unwrap();
        assert_eq!(thermostat.setpoint(), Some(21));
    }

    #[tokio::test]
    async fn out_of_bounds_setpoint_is_dropped() {
        let thermostat = plugin_with_limits(5, 30);
        thermostat
            .process_message("domus/devices/thermostat/hall", b"set_temp:99")
            .await
            .unwrap();
        assert_eq!(thermostat.setpoint(), None);
    }

    #[tokio::test]
    async fn malformed_temperature_is_a_payload_error() {
        let thermostat = plugin_with_limits(5, 30);
        let result = thermostat
            .process_message("domus/devices/thermostat/hall", b"set_temp:warm")
            .await;
        assert!(matches!(result, Err(PluginError::PayloadError(_))));
        assert_eq!(thermostat.setpoint(), None);
    }

    #[tokio::test]
    async fn unknown_command_is_tolerated() {
        let thermostat = plugin_with_limits(5, 30);
        thermostat
            .process_message("domus/devices/thermostat/hall", b"defrost")
            .await
            .unwrap();
        assert_eq!(thermostat.setpoint(), None);
    }

    #[tokio::test]
    async fn inverted_bounds_fail_initialization() {
        let thermostat = plugin_with_limits(30, 5);
        assert!(matches!(
            thermostat.initialize().await,
            Err(PluginError::InitializationError(_))
        ));
    }

    #[tokio::test]
    async fn default_bounds_apply_without_limits_table() {
        let thermostat = ThermostatPlugin::from_manifest(&PluginManifest {
            kind: "thermostat".to_string(),
            ..PluginManifest::default()
        })
        .unwrap();
        thermostat.initialize().await.unwrap();

        thermostat
            .process_message("domus/devices/thermostat/hall", b"set_temp:20")
            .await
            .unwrap();
        assert_eq!(thermostat.setpoint(), Some(20));
    }
}
