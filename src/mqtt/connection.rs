//! Connection state machine, transport thread and heartbeat supervision

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MqttSettings;
use crate::mqtt::InboundHandler;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal; never left once entered
    ShuttingDown,
}

/// Discriminated outcome of waiting for the connected signal
#[derive(Debug, PartialEq, Eq)]
pub enum ConnectionWait {
    Connected,
    TimedOut,
}

/// Counters exposed for supervision logging
#[derive(Clone, Debug, Default)]
pub struct ConnectionStats {
    pub messages_received: usize,
    pub messages_sent: usize,
    pub connect_attempts: usize,
    pub last_activity: Option<DateTime<Local>>,
}

/// Errors raised by connection operations
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid connection state: {0}")]
    InvalidState(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Failed to publish message: {0}")]
    PublishError(String),
}

/// Reconnect policy for the heartbeat task
///
/// The interval is fixed; there is deliberately no backoff. Supervision at a
/// steady cadence keeps behavior predictable on flaky home networks.
#[derive(Debug)]
pub struct HeartbeatPolicy {
    pub interval: Duration,
    initial_connect_attempted: AtomicBool,
}

impl HeartbeatPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            initial_connect_attempted: AtomicBool::new(false),
        }
    }

    fn mark_initial_attempt(&self) {
        self.initial_connect_attempted.store(true, Ordering::Relaxed);
    }

    fn initial_attempted(&self) -> bool {
        self.initial_connect_attempted.load(Ordering::Relaxed)
    }
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[derive(Default)]
struct StatsInner {
    messages_received: AtomicUsize,
    messages_sent: AtomicUsize,
    connect_attempts: AtomicUsize,
    // Millisecond timestamp, 0 = never
    last_activity_ms: AtomicI64,
}

/// Supervised broker connection
///
/// The state lives in a `watch` channel: the sender is the single writer,
/// every receiver is a wait condition. Protocol events arrive on a dedicated
/// transport thread which reports back through the `on_transport_*`
/// callbacks; the thread exits on the first error and the heartbeat owns
/// every retry.
pub struct ConnectionManager {
    settings: MqttSettings,
    filters: Vec<String>,
    state_tx: watch::Sender<ConnectionState>,
    client: Mutex<Option<Client>>,
    policy: HeartbeatPolicy,
    stats: StatsInner,
}

impl ConnectionManager {
    /// `filters` are the subscriptions re-applied after every (re)connect
    pub fn new(settings: MqttSettings, filters: Vec<String>, policy: HeartbeatPolicy) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            settings,
            filters,
            state_tx,
            client: Mutex::new(None),
            policy,
            stats: StatsInner::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// A receiver on the connection state, usable as a wait condition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        let ms = self.stats.last_activity_ms.load(Ordering::Relaxed);
        let last_activity = if ms == 0 {
            None
        } else {
            DateTime::from_timestamp_millis(ms).map(|utc| utc.with_timezone(&Local))
        };
        ConnectionStats {
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            connect_attempts: self.stats.connect_attempts.load(Ordering::Relaxed),
            last_activity,
        }
    }

    /// Starts a connection attempt without waiting for its outcome
    ///
    /// Valid only while disconnected; the result shows up on the state watch
    /// once the broker answers.
    pub async fn connect(
        self: &Arc<Self>,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), ConnectionError> {
        if !self.transition_from(ConnectionState::Disconnected, ConnectionState::Connecting) {
            return Err(ConnectionError::InvalidState(format!(
                "Connect is only valid while disconnected, current state is {:?}",
                self.state()
            )));
        }
        self.policy.mark_initial_attempt();
        info!(
            "Connecting to broker {}:{}",
            self.settings.broker, self.settings.port
        );
        self.start_transport(handler).await;
        Ok(())
    }

    async fn reconnect(
        self: &Arc<Self>,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), ConnectionError> {
        if !self.transition_from(ConnectionState::Disconnected, ConnectionState::Reconnecting) {
            return Err(ConnectionError::InvalidState(format!(
                "Reconnect is only valid while disconnected, current state is {:?}",
                self.state()
            )));
        }
        info!(
            "Reconnecting to broker {}:{}",
            self.settings.broker, self.settings.port
        );
        self.start_transport(handler).await;
        Ok(())
    }

    /// Blocks until the connection is established or the timeout passes
    pub async fn wait_for_connection(&self, timeout: Duration) -> ConnectionWait {
        let mut rx = self.state_tx.subscribe();
        let wait = rx.wait_for(|state| *state == ConnectionState::Connected);
        // The timeout result holds a borrow of rx; bound so it drops first
        let outcome = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(_)) => ConnectionWait::Connected,
            _ => ConnectionWait::TimedOut,
        };
        outcome
    }

    /// Publishes at QoS 0; fails fast while not connected
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), ConnectionError> {
        if self.state() != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }
        {
            let guard = self.client.lock().await;
            let client = guard.as_ref().ok_or(ConnectionError::NotConnected)?;
            client
                .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
                .map_err(|e| ConnectionError::PublishError(e.to_string()))?;
        }
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.touch_activity();
        debug!("Published {} bytes to {}", payload.len(), topic);
        Ok(())
    }

    /// Terminal shutdown: no state after this, best-effort broker DISCONNECT
    pub async fn disconnect(&self) {
        info!("Shutting down broker connection");
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::ShuttingDown {
                false
            } else {
                *state = ConnectionState::ShuttingDown;
                true
            }
        });

        let client = self.client.lock().await.take();
        if let Some(client) = client {
            if let Err(e) = client.disconnect() {
                debug!("Disconnect request not delivered: {}", e);
            }
        }
    }

    /// Supervision loop: reconnects at the policy interval while offline,
    /// logs connection health while online
    pub async fn heartbeat(
        self: Arc<Self>,
        handler: Arc<dyn InboundHandler>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so every real
        // tick is interval-spaced.
        ticker.tick().await;

        info!("Heartbeat started with interval {:?}", self.policy.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Heartbeat stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.state() {
                ConnectionState::Connected => {
                    let stats = self.stats();
                    debug!(
                        "Connection healthy: {} received, {} sent",
                        stats.messages_received, stats.messages_sent
                    );
                }
                ConnectionState::Disconnected => {
                    let result = if self.policy.initial_attempted() {
                        info!("Heartbeat attempting reconnect");
                        self.reconnect(Arc::clone(&handler)).await
                    } else {
                        info!("Heartbeat issuing initial connect");
                        self.connect(Arc::clone(&handler)).await
                    };
                    if let Err(e) = result {
                        warn!("Heartbeat connect attempt failed: {}", e);
                    }
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    debug!("Connection attempt already in progress");
                }
                ConnectionState::ShuttingDown => {
                    info!("Heartbeat stopped");
                    return;
                }
            }
        }
    }

    // Guarded transition; returns false when the current state is not `from`
    fn transition_from(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == from {
                *state = to.clone();
                true
            } else {
                false
            }
        });
        if changed {
            debug!("Connection state: {:?} -> {:?}", from, to);
        }
        changed
    }

    /// Hands the protocol loop to its own thread
    ///
    /// The rumqttc connection bundles a blocking runtime which must not be
    /// dropped on the scheduler, so the client/connection pair is built on
    /// the transport thread and the client handed back over a oneshot.
    async fn start_transport(self: &Arc<Self>, handler: Arc<dyn InboundHandler>) {
        self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);

        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.broker.clone(),
            self.settings.port,
        );
        options.set_keep_alive(Duration::from_secs(self.settings.keep_alive_secs));
        if let (Some(user), Some(password)) = (&self.settings.username, &self.settings.password) {
            options.set_credentials(user.clone(), password.clone());
        }

        let (client_tx, client_rx) = oneshot::channel();
        let manager = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("mqtt-transport".to_string())
            .spawn(move || {
                let (client, connection) = Client::new(options, 64);
                let _ = client_tx.send(client.clone());
                manager.transport_loop(client, connection, handler);
            });

        match spawned {
            Ok(_) => {
                if let Ok(client) = client_rx.await {
                    *self.client.lock().await = Some(client);
                } else {
                    error!("Transport thread ended before handing back a client");
                }
            }
            Err(e) => {
                error!("Failed to spawn transport thread: {}", e);
                self.on_transport_closed();
            }
        }
    }

    /// Protocol loop on the transport thread
    ///
    /// Exits on the first transport error or broker disconnect; retrying is
    /// the heartbeat's job, never this thread's.
    fn transport_loop(
        self: Arc<Self>,
        client: Client,
        mut connection: Connection,
        handler: Arc<dyn InboundHandler>,
    ) {
        debug!("Transport thread started");

        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        self.on_transport_connected(&client);
                    } else {
                        error!("Broker refused connection: {:?}", ack.code);
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.on_transport_publish(&publish.topic, &publish.payload, handler.as_ref());
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker requested disconnect");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Transport error: {}", e);
                    break;
                }
            }
        }

        self.on_transport_closed();
        debug!("Transport thread exited");
    }

    fn on_transport_connected(&self, client: &Client) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::ShuttingDown {
                false
            } else {
                *state = ConnectionState::Connected;
                true
            }
        });
        if !changed {
            debug!("Ignoring broker acknowledgement during shutdown");
            return;
        }

        info!(
            "Connected to broker {}:{}",
            self.settings.broker, self.settings.port
        );
        self.touch_activity();

        for filter in &self.filters {
            match client.subscribe(filter.as_str(), QoS::AtMostOnce) {
                Ok(()) => info!("Subscribed to topic: {}", filter),
                Err(e) => error!("Failed to subscribe to {}: {}", filter, e),
            }
        }
    }

    fn on_transport_publish(&self, topic: &str, payload: &[u8], handler: &dyn InboundHandler) {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        self.touch_activity();
        debug!("Received message on topic {}", topic);
        handler.on_message(topic, payload);
    }

    fn on_transport_closed(&self) {
        let changed = self.state_tx.send_if_modified(|state| {
            match *state {
                ConnectionState::ShuttingDown | ConnectionState::Disconnected => false,
                _ => {
                    *state = ConnectionState::Disconnected;
                    true
                }
            }
        });
        if changed {
            warn!("Connection lost, heartbeat will retry");
        }
    }

    fn touch_activity(&self) {
        self.stats
            .last_activity_ms
            .store(Local::now().timestamp_millis(), Ordering::Relaxed);
    }
}
