//! Built-in lights control
//!
//! Listens under `domus/devices/lights/#` for the plain-text commands
//! `lights_on` and `lights_off`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::plugin::manifest::PluginManifest;
use crate::plugin::{IotPlugin, PluginError};
use crate::topic::TopicFilter;

const LIGHTS_TOPIC_PATTERN: &str = "domus/devices/lights/#";

pub struct LightsPlugin {
    name: String,
    filter: TopicFilter,
    // Single flag, no ordering relationship to other data
    on: AtomicBool,
}

impl LightsPlugin {
    pub fn from_manifest(manifest: &PluginManifest) -> Result<Self, PluginError> {
        let filter = TopicFilter::parse(LIGHTS_TOPIC_PATTERN)
            .map_err(|e| PluginError::ConfigError(format!("Failed to compile pattern: {}", e)))?;
        Ok(Self {
            name: manifest.name.clone().unwrap_or_else(|| "lights".to_string()),
            filter,
            on: AtomicBool::new(false),
        })
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl IotPlugin for LightsPlugin {
    async fn initialize(&self) -> Result<(), PluginError> {
        info!("Initializing lights plugin '{}'", self.name);
        Ok(())
    }

    fn can_handle_topic(&self, topic: &str) -> bool {
        self.filter.matches(topic)
    }

    fn get_topics(&self) -> Vec<String> {
        vec![LIGHTS_TOPIC_PATTERN.to_string()]
    }

    async fn process_message(&self, topic: &str, payload: &[u8]) -> Result<(), PluginError> {
        let command = std::str::from_utf8(payload).map_err(|e| {
            PluginError::PayloadError(format!("Lights payload is not valid UTF-8: {}", e))
        })?;

        match command {
            "lights_on" => {
                self.on.store(true, Ordering::Relaxed);
                info!("Turning lights on");
            }
            "lights_off" => {
                self.on.store(false, Ordering::Relaxed);
                info!("Turning lights off");
            }
            other => warn!("Unrecognized lights command '{}' on {}", other, topic),
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        info!("Shutting down lights plugin '{}'", self.name);
        Ok(())
    }
}
