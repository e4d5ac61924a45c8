use color_eyre::{eyre::eyre, Result};
use parking_dashboard::bridge::{Bridge, CommandRoute, Dispatcher};
use parking_dashboard::config::DashboardConfig;
use parking_dashboard::dashboard::{LogStore, ParkingState};
use parking_dashboard::mqtt::{Codec, ConnectionHandle};
use parking_dashboard::ui::console;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const EVENT_CHANNEL_CAPACITY: usize = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = DashboardConfig::default_path();
    DashboardConfig::ensure_default_config(&config_path).await?;
    let config = DashboardConfig::load(&config_path).await?;

    setup_logging_env(config.log.level()?);
    info!("Using configuration {}", config_path.display());

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (connection, connection_task) = ConnectionHandle::spawn(config.mqtt.clone(), events_tx);

    let dispatcher = Dispatcher::new(
        ParkingState::new(),
        LogStore::new(config.log.capacity),
        Codec::new(config.mqtt.subscribe_topics.clone()),
        connection.clone(),
        CommandRoute::from_config(&config.mqtt),
    );
    let (bridge, bridge_task) = Bridge::spawn(dispatcher, events_rx);
    let bridge = bridge.with_connection(connection.clone());

    bridge
        .connect()
        .await
        .map_err(|e| eyre!("Failed to start broker connection: {}", e))?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received");
                ctrl_c.cancel();
            }
            Err(e) => error!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    console::run(bridge.clone(), shutdown).await?;

    info!("Shutting down");
    connection.shutdown();
    if let Err(e) = connection_task.await {
        error!("Connection worker ended abnormally: {}", e);
    }
    bridge.shutdown();
    if let Err(e) = bridge_task.await {
        error!("Dashboard bridge ended abnormally: {}", e);
    }

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
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
