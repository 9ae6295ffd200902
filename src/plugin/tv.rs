//! Built-in TV power control
//!
//! Listens under `domus/devices/tv/#` and decodes JSON power commands of the
//! form `{"powerState": "ON"}` / `{"powerState": "OFF"}`. The vendor remote
//! protocol itself is out of scope; commands terminate at the logging seam
//! where a real transport would attach.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::plugin::manifest::PluginManifest;
use crate::plugin::{IotPlugin, PluginError};
use crate::topic::TopicFilter;

const TV_TOPIC_PATTERN: &str = "domus/devices/tv/#";

/// JSON body of a TV power command
#[derive(Debug, Deserialize)]
struct PowerCommand {
    #[serde(rename = "powerState")]
    power_state: Option<String>,
}

pub struct TvPlugin {
    name: String,
    devices: Vec<String>,
    filter: TopicFilter,
}

impl TvPlugin {
    pub fn from_manifest(manifest: &PluginManifest) -> Result<Self, PluginError> {
        let filter = TopicFilter::parse(TV_TOPIC_PATTERN)
            .map_err(|e| PluginError::ConfigError(format!("Failed to compile pattern: {}", e)))?;
        let devices = manifest
            .usable_devices()
            .into_iter()
            .filter_map(|device| device.identity().map(String::from))
            .collect();
        Ok(Self {
            name: manifest.name.clone().unwrap_or_else(|| "tv".to_string()),
            devices,
            filter,
        })
    }

    /// Command seam; a vendor transport would hang off here
    fn set_power(&self, on: bool) {
        let state = if on { "ON" } else { "OFF" };
        if self.devices.is_empty() {
            info!("Turning TV {}", state);
        } else {
            for device in &self.devices {
                info!("Turning TV {} for device {}", state, device);
            }
        }
    }
}

#[async_trait]
impl IotPlugin for TvPlugin {
    async fn initialize(&self) -> Result<(), PluginError> {
        info!(
            "Initializing TV plugin '{}' with {} devices",
            self.name,
            self.devices.len()
        );
        Ok(())
    }

    fn can_handle_topic(&self, topic: &str) -> bool {
        self.filter.matches(topic)
    }

    fn get_topics(&self) -> Vec<String> {
        vec![TV_TOPIC_PATTERN.to_string()]
    }

    async fn process_message(&self, topic: &str, payload: &[u8]) -> Result<(), PluginError> {
        let command: PowerCommand = serde_json::from_slice(payload).map_err(|e| {
            PluginError::PayloadError(format!("Failed to decode TV message payload: {}", e))
        })?;

        match command.power_state.as_deref() {
            Some("ON") => self.set_power(true),
            Some("OFF") => self.set_power(false),
            other => warn!("Unrecognized power state {:?} on {}", other, topic),
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        info!("Shutting down TV plugin '{}'", self.name);
        Ok(())
    }
}
