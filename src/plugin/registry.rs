//! Plugin discovery and registration
//!
//! The registry is built once during startup and then shared read-only:
//! [`PluginRegistry::discover`] scans the plugin directory, registers every
//! viable unit, and the result is wrapped in an `Arc` for the routing path.
//! Registration order is the sorted unit-directory-name order, so routing
//! priority is deterministic across runs.
//!
//! A broken unit (unreadable manifest, unknown kind, failing constructor or
//! `initialize`) is logged and skipped; only an unreadable plugin directory
//! aborts startup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::plugin::manifest::PluginManifest;
use crate::plugin::{create_builtin, IotPlugin, PluginError, PluginLifecycle};
use crate::topic::TopicFilter;

/// Errors raised while building the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read plugin directory: {0}")]
    DirectoryError(String),
}

// Lifecycle encoding for the per-handle atomic
const STATE_UNINITIALIZED: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_SHUTTING_DOWN: u8 = 2;
const STATE_SHUTDOWN: u8 = 3;

fn lifecycle_from_state(state: u8) -> PluginLifecycle {
    match state {
        STATE_UNINITIALIZED => PluginLifecycle::Uninitialized,
        STATE_READY => PluginLifecycle::Ready,
        STATE_SHUTTING_DOWN => PluginLifecycle::ShuttingDown,
        _ => PluginLifecycle::Shutdown,
    }
}

/// One registered plugin together with its compiled subscriptions
pub struct PluginHandle {
    name: String,
    plugin: Arc<dyn IotPlugin>,
    filters: Vec<TopicFilter>,
    state: AtomicU8,
}

impl PluginHandle {
    fn new(name: String, plugin: Arc<dyn IotPlugin>) -> Self {
        Self {
            name,
            plugin,
            filters: Vec::new(),
            state: AtomicU8::new(STATE_UNINITIALIZED),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> Arc<dyn IotPlugin> {
        Arc::clone(&self.plugin)
    }

    pub fn filters(&self) -> &[TopicFilter] {
        &self.filters
    }

    /// Whether any compiled pattern of this handle matches `topic`
    pub fn matches(&self, topic: &str) -> bool {
        self.filters.iter().any(|filter| filter.matches(topic))
    }

    pub fn lifecycle(&self) -> PluginLifecycle {
        lifecycle_from_state(self.state.load(Ordering::Acquire))
    }

    fn mark_ready(&self) {
        self.state.store(STATE_READY, Ordering::Release);
    }

    // Claims the single shutdown slot; false when already claimed
    fn begin_shutdown(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_READY,
                STATE_SHUTTING_DOWN,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn finish_shutdown(&self) {
        self.state.store(STATE_SHUTDOWN, Ordering::Release);
    }
}

/// Ordered collection of registered plugins
///
/// Mutable only while discovery runs; afterwards shared as
/// `Arc<PluginRegistry>` with lock-free reads on the routing path.
pub struct PluginRegistry {
    handles: Vec<PluginHandle>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Scans `dir` and registers every viable plugin unit
    ///
    /// Entries whose names start with `.` or `_` and plain files are not
    /// candidates. Each remaining subdirectory must carry a `plugin.toml`;
    /// units that fail anywhere between manifest parsing and `initialize`
    /// are skipped individually.
    pub async fn discover(dir: &Path) -> Result<Self, RegistryError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| RegistryError::DirectoryError(format!("{}: {}", dir.display(), e)))?;

        let mut unit_dirs: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name.starts_with('_') {
                debug!("Skipping non-candidate entry: {}", name);
                continue;
            }
            let path = entry.path();
            if !path.is_dir() {
                debug!("Skipping plain file: {}", name);
                continue;
            }
            unit_dirs.push(path);
        }
        unit_dirs.sort();

        let mut registry = PluginRegistry::new();
        for unit_dir in unit_dirs {
            let unit = unit_dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Err(e) = registry.register_unit(&unit, &unit_dir).await {
                error!("Skipping plugin unit '{}': {}", unit, e);
            }
        }

        info!(
            "Plugin discovery complete: {} plugins registered",
            registry.len()
        );
        Ok(registry)
    }

    async fn register_unit(&mut self, unit: &str, unit_dir: &Path) -> Result<(), PluginError> {
        let manifest = PluginManifest::load(unit_dir)?;
        let plugin = create_builtin(&manifest)?;
        let name = manifest.name.clone().unwrap_or_else(|| unit.to_string());
        self.register(&name, plugin).await
    }

    /// Initializes and appends one plugin
    ///
    /// Subscription patterns are compiled here; an invalid pattern is dropped
    /// with a log while the plugin keeps its remaining valid patterns.
    pub async fn register(
        &mut self,
        name: &str,
        plugin: Arc<dyn IotPlugin>,
    ) -> Result<(), PluginError> {
        let mut handle = PluginHandle::new(name.to_string(), Arc::clone(&plugin));
        plugin.initialize().await?;

        for pattern in plugin.get_topics() {
            match TopicFilter::parse(&pattern) {
                Ok(filter) => handle.filters.push(filter),
                Err(e) => warn!(
                    "Dropping invalid subscription pattern '{}' for plugin '{}': {}",
                    pattern, name, e
                ),
            }
        }

        handle.mark_ready();
        info!(
            "Registered plugin '{}' with {} patterns",
            name,
            handle.filters.len()
        );
        self.handles.push(handle);
        Ok(())
    }

    pub fn handles(&self) -> &[PluginHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// First registered handle whose compiled patterns match `topic`
    pub fn route(&self, topic: &str) -> Option<&PluginHandle> {
        self.handles.iter().find(|handle| handle.matches(topic))
    }

    /// Every raw subscription pattern across all handles, registration order
    pub fn subscription_patterns(&self) -> Vec<String> {
        self.handles
            .iter()
            .flat_map(|handle| handle.filters.iter().map(|f| f.as_str().to_string()))
            .collect()
    }

    /// Shuts down every live handle exactly once, in registration order
    ///
    /// Best effort: one plugin failing to shut down never stops the rest.
    pub async fn shutdown_all(&self) {
        for handle in &self.handles {
            if !handle.begin_shutdown() {
                debug!("Shutdown already handled for plugin '{}'", handle.name());
                continue;
            }
            match handle.plugin.shutdown().await {
                Ok(()) => debug!("Plugin '{}' shut down", handle.name()),
                Err(e) => error!("Plugin '{}' shutdown failed: {}", handle.name(), e),
            }
            handle.finish_shutdown();
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
