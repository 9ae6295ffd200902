//! # Device Plugin Module
//!
//! Everything the bridge knows about controllable devices lives behind the
//! [`IotPlugin`] contract. Plugins are discovered from a directory at startup,
//! initialized once, and then receive inbound broker messages routed by topic.
//!
//! ## Module Architecture
//!
//! ```text
//! plugin/
//! ├── manifest.rs   - plugin.toml parsing (kind, devices, limits)
//! ├── registry.rs   - discovery, registration order, shutdown
//! ├── tv.rs         - built-in TV power control
//! ├── lights.rs     - built-in lights control
//! └── thermostat.rs - built-in thermostat control
//! ```
//!
//! ## Design Notes
//!
//! - **Identifier dispatch**: a manifest names its implementation through the
//!   `kind` key; [`create_builtin`] resolves that identifier against a fixed
//!   `match`. There is no runtime type discovery and no dynamic loading.
//! - **Failure isolation**: a broken plugin unit never aborts startup. The
//!   registry logs the failure and carries on with the remaining units.
//! - **Shared handles**: registered plugins live behind `Arc<dyn IotPlugin>`
//!   with `&self` receivers; a plugin owns its interior state.

pub mod lights;
pub mod manifest;
pub mod registry;
pub mod thermostat;
pub mod tv;

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::plugin::manifest::PluginManifest;

/// Error types for plugin construction, initialization and message handling
#[derive(Debug, Error)]
pub enum PluginError {
    /// Manifest or device configuration is unusable
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// One-time setup failed
    #[error("Initialization error: {0}")]
    InitializationError(String),

    /// Inbound payload could not be decoded
    #[error("Payload error: {0}")]
    PayloadError(String),

    /// A device command was understood but could not be carried out
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Cleanup failed during shutdown
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

/// Lifecycle states of a registered plugin handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginLifecycle {
    /// Constructed but `initialize` has not completed
    Uninitialized,

    /// Initialized and receiving messages
    Ready,

    /// `shutdown` is in flight
    ShuttingDown,

    /// `shutdown` has completed (or was abandoned after an error)
    Shutdown,
}

/// Built-in plugin implementations selectable via a manifest `kind` key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Tv,
    Lights,
    Thermostat,
}

impl PluginKind {
    /// Resolves a manifest identifier to a built-in kind
    pub fn from_identifier(kind: &str) -> Option<Self> {
        match kind {
            "tv" => Some(PluginKind::Tv),
            "lights" => Some(PluginKind::Lights),
            "thermostat" => Some(PluginKind::Thermostat),
            _ => None,
        }
    }
}

impl Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginKind::Tv => write!(f, "tv"),
            PluginKind::Lights => write!(f, "lights"),
            PluginKind::Thermostat => write!(f, "thermostat"),
        }
    }
}

/// Capability contract every device plugin implements
///
/// The set of capabilities is fixed: one-time setup, topic ownership,
/// message processing, and cleanup. Handles are shared as
/// `Arc<dyn IotPlugin>` across dispatch tasks.
#[async_trait]
pub trait IotPlugin: Send + Sync + 'static {
    /// One-time setup before any message is delivered
    async fn initialize(&self) -> Result<(), PluginError>;

    /// Whether this plugin is willing to process messages on `topic`
    fn can_handle_topic(&self, topic: &str) -> bool;

    /// Raw subscription patterns this plugin wants registered
    fn get_topics(&self) -> Vec<String>;

    /// Handles one inbound message addressed to this plugin
    async fn process_message(&self, topic: &str, payload: &[u8]) -> Result<(), PluginError>;

    /// Releases plugin resources; invoked exactly once during shutdown
    async fn shutdown(&self) -> Result<(), PluginError>;
}

/// Instantiates the built-in implementation a manifest selects
///
/// Lookup happens once at registration time; an unknown identifier is a
/// configuration error for that unit alone.
pub fn create_builtin(manifest: &PluginManifest) -> Result<Arc<dyn IotPlugin>, PluginError> {
    let kind = PluginKind::from_identifier(&manifest.kind).ok_or_else(|| {
        PluginError::ConfigError(format!("Unknown plugin kind: {}", manifest.kind))
    })?;

    let plugin: Arc<dyn IotPlugin> = match kind {
        PluginKind::Tv => Arc::new(tv::TvPlugin::from_manifest(manifest)?),
        PluginKind::Lights => Arc::new(lights::LightsPlugin::from_manifest(manifest)?),
        PluginKind::Thermostat => Arc::new(thermostat::ThermostatPlugin::from_manifest(manifest)?),
    };
    Ok(plugin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_identifiers_round_trip() {
        for kind in [PluginKind::Tv, PluginKind::Lights, PluginKind::Thermostat] {
            assert_eq!(PluginKind::from_identifier(&kind.to_string()), Some(kind));
        }
        assert_eq!(PluginKind::from_identifier("toaster"), None);
    }

    #[test]
    fn unknown_kind_is_a_config_error() {
        let manifest = PluginManifest {
            kind: "toaster".to_string(),
            ..PluginManifest::default()
        };
        assert!(matches!(
            create_builtin(&manifest),
            Err(PluginError::ConfigError(_))
        ));
    }
}
