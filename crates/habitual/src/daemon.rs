//! Daemon command for running the reminder dispatch loop.

use std::sync::Arc;

use miette::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use habitual_push::PushGateway;
use habitual_scheduler::{DispatchConfig, DispatchEngine, TimezoneCatalog, local_time_in};
use habitual_store::SqliteStore;

/// Configuration for the daemon.
pub struct DaemonConfig {
    /// SQLite database path.
    pub database: String,
    /// Comma-separated zone list overriding the builtin catalog.
    pub timezones: Option<String>,
    pub dispatch: DispatchConfig,
}

/// Build the zone catalog from an optional comma-separated override.
///
/// Zones the tz database does not know are reported once here and left out,
/// so the per-minute jobs never see them.
pub fn build_catalog(timezones: Option<&str>) -> Result<TimezoneCatalog> {
    let Some(list) = timezones.filter(|s| !s.trim().is_empty()) else {
        return Ok(TimezoneCatalog::builtin());
    };

    let now = chrono::Utc::now();
    let known = list.split(',').map(str::trim).filter(|zone| {
        if zone.is_empty() || local_time_in(zone, now).is_ok() {
            return true;
        }
        warn!(zone = %zone, "configured timezone is not in the tz database, ignoring it");
        false
    });

    TimezoneCatalog::from_ids(known).map_err(|e| miette::miette!("invalid timezone list: {}", e))
}

/// Run the dispatch engine until Ctrl-C.
pub async fn run(config: DaemonConfig, gateway: Arc<dyn PushGateway>) -> Result<()> {
    let store = SqliteStore::open(&config.database)
        .map_err(|e| miette::miette!("failed to open database: {}", e))?;
    let catalog = Arc::new(build_catalog(config.timezones.as_deref())?);

    info!(
        database = %config.database,
        zones = catalog.len(),
        broadcast_time = %config.dispatch.broadcast_time,
        daily_log_time = %config.dispatch.daily_log_time,
        reminder_minute = config.dispatch.reminder_minute,
        max_concurrent_sends = config.dispatch.max_concurrent_sends,
        "starting habitual daemon"
    );

    let engine = DispatchEngine::standard(&config.dispatch, catalog, Arc::new(store), gateway);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    engine.run(shutdown_rx).await;

    info!("daemon stopped");
    Ok(())
}
