//! Plugin unit manifests (`plugin.toml`)

use serde::Deserialize;
use std::path::Path;
use tracing::error;

use crate::plugin::PluginError;

/// Parsed contents of a plugin unit's `plugin.toml`
///
/// Only `kind` is required; it names the built-in implementation to
/// instantiate. Everything else is optional plugin configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginManifest {
    /// Identifier of the built-in implementation
    pub kind: String,

    /// Display name for logs; defaults to the unit's directory name
    pub name: Option<String>,

    /// Devices this plugin drives
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,

    /// Numeric limits, currently used by the thermostat kind
    pub limits: Option<ManifestLimits>,
}

/// One controllable device listed in a manifest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceEntry {
    pub device_id: Option<String>,
    pub object_id: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
}

/// Bounds for numeric device commands
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ManifestLimits {
    pub min_temp: i64,
    pub max_temp: i64,
}

impl DeviceEntry {
    /// The identity this device is keyed by, preferring `device_id`
    pub fn identity(&self) -> Option<&str> {
        self.device_id.as_deref().or(self.object_id.as_deref())
    }
}

impl PluginManifest {
    pub const FILE_NAME: &'static str = "plugin.toml";

    /// Reads and parses the manifest inside one plugin unit directory
    pub fn load(unit_dir: &Path) -> Result<Self, PluginError> {
        let path = unit_dir.join(Self::FILE_NAME);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            PluginError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let manifest: PluginManifest = toml::from_str(&raw).map_err(|e| {
            PluginError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        if manifest.kind.trim().is_empty() {
            return Err(PluginError::ConfigError(format!(
                "Manifest {} has an empty plugin kind",
                path.display()
            )));
        }
        Ok(manifest)
    }

    /// Devices carrying a usable identity
    ///
    /// Entries with neither `device_id` nor `object_id` cannot be addressed;
    /// they are logged and dropped instead of failing the whole unit.
    pub fn usable_devices(&self) -> Vec<&DeviceEntry> {
        self.devices
            .iter()
            .filter(|device| {
                if device.identity().is_none() {
                    error!(
                        "Skipping device entry '{}' without device_id or object_id",
                        device.name.as_deref().unwrap_or("<unnamed>")
                    );
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &TempDir, contents: &str) {
        std::fs::write(dir.path().join(PluginManifest::FILE_NAME), contents).unwrap();
    }

    #[test]
    fn parses_a_full_manifest() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            &dir,
            r#"
kind = "thermostat"
name = "Hallway"

[limits]
min_temp = 5
max_temp = 30

[[devices]]
device_id = "uuid:1"
address = "10.0.0.5"

[[devices]]
object_id = "obj-2"
"#,
        );

        let manifest = PluginManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.kind, "thermostat");
        assert_eq!(manifest.name.as_deref(), Some("Hallway"));
        assert_eq!(manifest.devices.len(), 2);
        assert_eq!(manifest.devices[0].identity(), Some("uuid:1"));
        assert_eq!(manifest.devices[1].identity(), Some("obj-2"));
        let limits = manifest.limits.unwrap();
        assert_eq!((limits.min_temp, limits.max_temp), (5, 30));
    }

    #[test]
    fn missing_manifest_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            PluginManifest::load(dir.path()),
            Err(PluginError::ConfigError(_))
        ));
    }

    #[test]
    fn manifest_without_kind_fails_to_parse() {
        let dir = TempDir::new().unwrap();
        write_manifest(&dir, "name = \"incomplete\"\n");
        assert!(matches!(
            PluginManifest::load(dir.path()),
            Err(PluginError::ConfigError(_))
        ));
    }

    #[test]
    fn devices_without_identity_are_filtered() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            &dir,
            r#"
kind = "tv"

[[devices]]
device_id = "uuid:tv-1"

[[devices]]
name = "no identity here"
address = "10.0.0.9"
"#,
        );

        let manifest = PluginManifest::load(dir.path()).unwrap();
        let usable = manifest.usable_devices();
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].identity(), Some("uuid:tv-1"));
    }
}
