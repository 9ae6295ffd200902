//! First-match routing of inbound messages into the plugin registry
//!
//! The router is the [`InboundHandler`] installed on the transport thread.
//! It stamps each publish into an [`InboundMessage`] and submits a dispatch
//! task over the bridge, so the transport thread returns immediately and
//! messages process concurrently on the scheduler.
//!
//! Routing walks the registry in registration order and delivers to the
//! first handle whose compiled patterns match. At most one plugin sees any
//! given message.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Local;
use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::bridge::TaskBridge;
use crate::mqtt::connection::ConnectionState;
use crate::mqtt::{InboundHandler, InboundMessage};
use crate::plugin::registry::PluginRegistry;

pub struct MessageRouter {
    registry: Arc<PluginRegistry>,
    bridge: TaskBridge,
    state: watch::Receiver<ConnectionState>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<PluginRegistry>,
        bridge: TaskBridge,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            registry,
            bridge,
            state,
        }
    }

    /// Runs as its own scheduler task, one per inbound message
    ///
    /// Plugin failures end here: an error is logged with its topic, a panic
    /// is caught at this boundary, and neither reaches the caller.
    async fn dispatch(registry: Arc<PluginRegistry>, message: InboundMessage) {
        let queued = Local::now().signed_duration_since(message.received_at());
        debug!(
            "Dispatching message queued {}ms ago: {}",
            queued.num_milliseconds(),
            message
        );

        let Some(handle) = registry.route(message.topic()) else {
            warn!("No plugin claims topic '{}', dropping message", message.topic());
            return;
        };

        let plugin = handle.plugin();
        let outcome = AssertUnwindSafe(plugin.process_message(message.topic(), message.payload()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => debug!(
                "Plugin '{}' processed message on {}",
                handle.name(),
                message.topic()
            ),
            Ok(Err(e)) => error!(
                "Plugin '{}' failed to process message on {}: {}",
                handle.name(),
                message.topic(),
                e
            ),
            Err(_) => error!(
                "Plugin '{}' panicked while processing message on {}",
                handle.name(),
                message.topic()
            ),
        }
    }
}

impl InboundHandler for MessageRouter {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        if *self.state.borrow() == ConnectionState::ShuttingDown {
            debug!("Shutting down, dropping message on {}", topic);
            return;
        }

        let message = InboundMessage::new(topic, payload);
        let registry = Arc::clone(&self.registry);
        if let Err(e) = self.bridge.submit(Self::dispatch(registry, message)) {
            warn!("Dropping message on {}: {}", topic, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge;
    use crate::plugin::{IotPlugin, PluginError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    enum Behavior {
        Succeed,
        Fail,
        Panic,
    }

    struct RecordingPlugin {
        topics: Vec<&'static str>,
        seen: Arc<Mutex<Vec<String>>>,
        behavior: Behavior,
    }

    impl RecordingPlugin {
        fn new(topics: Vec<&'static str>, behavior: Behavior) -> (Self, Arc<Mutex<Vec<String>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    topics,
                    seen: Arc::clone(&seen),
                    behavior,
                },
                seen,
            )
        }
    }

    #[async_trait]
    impl IotPlugin for RecordingPlugin {
        async fn initialize(&self) -> Result<(), PluginError> {
            Ok(())
        }

        fn can_handle_topic(&self, _topic: &str) -> bool {
            true
        }

        fn get_topics(&self) -> Vec<String> {
            self.topics.iter().map(|t| t.to_string()).collect()
        }

        async fn process_message(&self, topic: &str, _payload: &[u8]) -> Result<(), PluginError> {
            self.seen.lock().unwrap().push(topic.to_string());
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(PluginError::DeviceError("scripted failure".to_string())),
                Behavior::Panic => panic!("scripted panic"),
            }
        }

        async fn shutdown(&self) -> Result<(), PluginError> {
            Ok(())
        }
    }

    struct Harness {
        router: MessageRouter,
        bridge: TaskBridge,
        state_tx: watch::Sender<ConnectionState>,
        token: CancellationToken,
    }

    async fn harness(registry: PluginRegistry) -> Harness {
        let (bridge, worker) = bridge::channel(Duration::from_secs(1));
        let token = CancellationToken::new();
        tokio::spawn(worker.run(token.clone()));

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let router = MessageRouter::new(Arc::new(registry), bridge.clone(), state_rx);
        Harness {
            router,
            bridge,
            state_tx,
            token,
        }
    }

    /// Waits until everything submitted before this call has run
    async fn flush(bridge: &TaskBridge) {
        let (tx, rx) = oneshot::channel();
        bridge
            .submit(async move {
                let _ = tx.send(());
            })
            .unwrap();
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn routes_to_the_first_registered_match() {
        let mut registry = PluginRegistry::new();
        let (first, seen_first) = RecordingPlugin::new(vec!["overlap/#"], Behavior::Succeed);
        let (second, seen_second) = RecordingPlugin::new(vec!["overlap/#"], Behavior::Succeed);
        registry.register("first", Arc::new(first)).await.unwrap();
        registry.register("second", Arc::new(second)).await.unwrap();

        let h = harness(registry).await;
        h.router.on_message("overlap/x", b"payload");
        flush(&h.bridge).await;

        assert_eq!(*seen_first.lock().unwrap(), vec!["overlap/x".to_string()]);
        assert!(seen_second.lock().unwrap().is_empty());
        h.token.cancel();
    }

    #[tokio::test]
    async fn unmatched_topic_is_dropped() {
        let mut registry = PluginRegistry::new();
        let (plugin, seen) = RecordingPlugin::new(vec!["a/#"], Behavior::Succeed);
        registry.register("a", Arc::new(plugin)).await.unwrap();

        let h = harness(registry).await;
        h.router.on_message("b/x", b"payload");
        flush(&h.bridge).await;

        assert!(seen.lock().unwrap().is_empty());
        h.token.cancel();
    }

    #[tokio::test]
    async fn plugin_error_does_not_stop_later_messages() {
        let mut registry = PluginRegistry::new();
        let (plugin, seen) = RecordingPlugin::new(vec!["a/#"], Behavior::Fail);
        registry.register("a", Arc::new(plugin)).await.unwrap();

        let h = harness(registry).await;
        h.router.on_message("a/1", b"p");
        h.router.on_message("a/2", b"p");
        flush(&h.bridge).await;

        assert_eq!(seen.lock().unwrap().len(), 2);
        h.token.cancel();
    }

    #[tokio::test]
    async fn plugin_panic_is_contained() {
        let mut registry = PluginRegistry::new();
        let (panicking, seen_panic) = RecordingPlugin::new(vec!["a/#"], Behavior::Panic);
        let (healthy, seen_healthy) = RecordingPlugin::new(vec!["b/#"], Behavior::Succeed);
        registry.register("a", Arc::new(panicking)).await.unwrap();
        registry.register("b", Arc::new(healthy)).await.unwrap();

        let h = harness(registry).await;
        h.router.on_message("a/1", b"p");
        h.router.on_message("b/1", b"p");
        flush(&h.bridge).await;

        assert_eq!(seen_panic.lock().unwrap().len(), 1);
        assert_eq!(seen_healthy.lock().unwrap().len(), 1);
        h.token.cancel();
    }

    #[tokio::test]
    async fn messages_are_dropped_once_shutting_down() {
        let mut registry = PluginRegistry::new();
        let (plugin, seen) = RecordingPlugin::new(vec!["a/#"], Behavior::Succeed);
        registry.register("a", Arc::new(plugin)).await.unwrap();

        let h = harness(registry).await;
        h.state_tx.send(ConnectionState::ShuttingDown).unwrap();
        h.router.on_message("a/1", b"p");
        flush(&h.bridge).await;

        assert!(seen.lock().unwrap().is_empty());
        h.token.cancel();
    }
}
