//! Process entry: logging, settings, runtime and the engine loop.
//!
//! The chat integration lives outside this crate. Out of the box alerts go
//! to the log through `LogChannelSender`.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};

use crate::core::alerts::dispatcher::{ChannelSender, SendOptions};
use crate::core::alerts::model::ChannelId;
use crate::core::config::ConfigManager;
use crate::core::coordinator::Coordinator;
use crate::core::error::DeliveryError;

const CONFIG_DIR_ENV: &str = "RESPAWN_WATCH_CONFIG_DIR";

/// Writes every outbound message to the log.
pub struct LogChannelSender;

#[async_trait]
impl ChannelSender for LogChannelSender {
    async fn send(
        &self,
        channel: ChannelId,
        message: &str,
        options: SendOptions,
    ) -> Result<(), DeliveryError> {
        let mention = if options.broadcast { " @everyone" } else { "" };
        let spoken = if options.tts { " (tts)" } else { "" };
        info!(target: "channel", "[{}]{} {}{}", channel, spoken, message, mention);
        Ok(())
    }
}

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Could not listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

pub fn run() -> Result<(), Box<dyn Error>> {
    init_logging();

    let config_dir = std::env::var_os(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let config_manager = ConfigManager::new(config_dir.clone());
    let settings = config_manager.load();
    info!("Loaded settings from {:?}", config_dir);
    if settings.channels.is_empty() {
        warn!("No channels configured; alerts will only appear in this log");
    }

    let coordinator = Arc::new(Coordinator::new(settings, Arc::new(LogChannelSender))?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(coordinator.run(shutdown_signal()));

    Ok(())
}
