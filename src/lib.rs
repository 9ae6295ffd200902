//! domusbridge - a resilient MQTT-to-device-plugin bridge
//!
//! The bridge subscribes to an MQTT broker, routes every inbound publish to
//! the first device plugin whose topic patterns claim it, and keeps the
//! connection alive through a heartbeat that reconnects after transport
//! failures. Plugins are discovered from manifest files on disk at startup
//! and run behind one shared trait object each.

pub mod bridge;
pub mod config;
pub mod mqtt;
pub mod plugin;
pub mod topic;
