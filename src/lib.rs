//! Issue Mirror - keeps a local SQLite mirror of GitHub issue searches.
//!
//! Channels are saved searches. The sync engine plans them into as few
//! outbound queries as fit the URI limit, keeps each query's results in sync
//! in both directions and publishes per-channel unread counts.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

use config::Settings;
use error::AppError;
use services::{GitHubClientFactory, SyncEngine, WebhookAlertSink};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Open the store, start the engine and run until Ctrl-C.
pub async fn run(settings: Settings) -> Result<(), AppError> {
    log::info!("[sync] Using database {}", settings.database_path.display());
    let pool = db::initialize(&settings.database_path).await?;

    let timeout = std::time::Duration::from_secs(settings.sync.request_timeout_secs);
    if settings.alert_webhook_url.is_none() {
        log::warn!("[alert] No alert webhook configured, failures will only be logged");
    }
    let alert = WebhookAlertSink::new(settings.alert_webhook_url.clone(), timeout)?;
    let factory = GitHubClientFactory {
        timeout_secs: settings.sync.request_timeout_secs,
    };

    let engine = SyncEngine::new(pool, settings.sync, Arc::new(alert), Arc::new(factory));
    let handle = engine.start(CancellationToken::new()).await?;
    log::info!(
        "[sync] Sync engine started with {} queries",
        handle.queries().len()
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::internal(format!("Failed to wait for Ctrl-C: {}", e)))?;

    log::info!("[sync] Shutting down");
    handle.shutdown().await;
    Ok(())
}
