//! # MQTT Integration Module
//!
//! Connects the bridge to its broker and moves every inbound publish to the
//! plugin that owns it. The module implements a state-machine-driven client
//! with heartbeat supervision and strictly non-blocking handoff from the
//! transport thread to the async scheduler.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── connection.rs  - Connection state machine, transport thread, heartbeat
//! ├── message.rs     - Inbound message representation
//! └── router.rs      - First-match routing into the plugin registry
//! ```
//!
//! ## Message Flow
//!
//! The broker client library delivers packets on a dedicated OS thread. That
//! thread must never block and never touch plugin code directly:
//!
//! ```text
//! transport thread ── InboundHandler::on_message ──> MessageRouter
//!                                                        │ submit
//!                                                    TaskBridge
//!                                                        │ spawn
//!                                                  dispatch task ──> plugin
//! ```
//!
//! ## Design Notes
//!
//! - **Connection supervision**: the heartbeat task re-establishes dropped
//!   connections at a fixed interval; the transport thread itself never
//!   retries, so there is exactly one reconnect authority.
//! - **Containment**: plugin failures are confined to their dispatch task.
//!   A plugin returning an error or panicking cannot stall the transport
//!   thread or the scheduler.

pub mod connection;
pub mod message;
pub mod router;

pub use connection::{
    ConnectionError, ConnectionManager, ConnectionState, ConnectionStats, ConnectionWait,
    HeartbeatPolicy,
};
pub use message::InboundMessage;
pub use router::MessageRouter;

/// Receiver seam for packets arriving on the transport thread
///
/// Implementations must return quickly and must not block; the transport
/// thread calls this inline between protocol packets.
pub trait InboundHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: &[u8]);
}
