use color_eyre::{eyre::eyre, Result};
use domusbridge::bridge;
use domusbridge::config::BridgeConfig;
use domusbridge::mqtt::{
    ConnectionManager, ConnectionWait, HeartbeatPolicy, InboundHandler, MessageRouter,
};
use domusbridge::plugin::registry::PluginRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = BridgeConfig::load(config_path.as_deref())
        .map_err(|e| eyre!("Failed to load configuration: {}", e))?;

    let registry = PluginRegistry::discover(&config.plugin_dir)
        .await
        .map_err(|e| eyre!("Failed to discover plugins: {}", e))?;
    if registry.is_empty() {
        warn!("No plugins discovered, inbound device messages will be dropped");
    } else {
        info!("Discovered {} plugins", registry.len());
    }
    let registry = Arc::new(registry);

    let mut filters = vec![config.mqtt.default_topic.clone()];
    filters.extend(registry.subscription_patterns());

    let (bridge, worker) = bridge::channel(config.shutdown_grace());
    let manager = Arc::new(ConnectionManager::new(
        config.mqtt.clone(),
        filters,
        HeartbeatPolicy::new(config.heartbeat_interval()),
    ));
    let router: Arc<dyn InboundHandler> = Arc::new(MessageRouter::new(
        Arc::clone(&registry),
        bridge.clone(),
        manager.watch_state(),
    ));

    manager
        .connect(Arc::clone(&router))
        .await
        .map_err(|e| eyre!("Failed to start broker connection: {}", e))?;
    match manager.wait_for_connection(config.connect_timeout()).await {
        ConnectionWait::Connected => info!("Bridge is online"),
        ConnectionWait::TimedOut => warn!(
            "Broker not reachable within {:?}, heartbeat keeps retrying",
            config.connect_timeout()
        ),
    }

    let shutdown = CancellationToken::new();
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));
    let heartbeat_handle = tokio::spawn(
        Arc::clone(&manager).heartbeat(Arc::clone(&router), shutdown.clone()),
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested");

    shutdown.cancel();
    manager.disconnect().await;
    registry.shutdown_all().await;
    let _ = heartbeat_handle.await;
    let _ = worker_handle.await;
    info!("Bridge stopped");

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
