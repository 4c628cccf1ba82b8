mod commands;
mod config;
mod delivery;
mod dispatcher;
mod mailer;
mod platform;
mod retry;
mod store;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::CommandRouter;
use crate::config::Config;
use crate::delivery::DeliveryPipeline;
use crate::dispatcher::{Dispatcher, EventHandler};
use crate::mailer::HttpMailer;
use crate::platform::telegram::{self, TelegramFetcher, TelegramNotifier, TelegramSource};
use crate::platform::Notifier;
use crate::store::RecordStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kindlebot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Sender address: {}", config.mail.sender);
    info!("  Database: {}", config.storage.database_path.display());
    info!("  Max workers: {}", config.dispatcher.max_workers);
    info!("  Max payload size: {} bytes", config.delivery.max_payload_size);

    let store = RecordStore::open(&config.storage.database_path)?;

    let bot = telegram::build_bot(&config)?;
    let me = bot.get_me().await.context("Failed to reach the Telegram Bot API")?;
    info!("Starting bot @{}", me.username());
    telegram::register_commands(&bot).await;

    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(bot.clone()));
    let fetcher = Arc::new(TelegramFetcher::new(
        bot.clone(),
        config.delivery.download_timeout(),
    ));
    let mailer = Arc::new(HttpMailer::new(&config)?);

    let pipeline = DeliveryPipeline::new(&config, store.clone(), fetcher, mailer, notifier.clone());
    let commands = CommandRouter::new(store, notifier.clone(), config.mail.sender.clone());
    let handler = EventHandler::new(pipeline, commands, notifier);

    let source = TelegramSource::new(bot, config.telegram.poll_timeout_secs);
    let dispatcher = Dispatcher::new(&config, source, handler);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    match dispatcher.run(cancel).await {
        Ok(reason) => info!(?reason, "Bot stopped"),
        Err(e) => {
            error!("Bot stopped: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}

/// Cancel on Ctrl-C or SIGTERM
async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    cancel.cancel();
}
