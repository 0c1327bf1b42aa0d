// =============================================================================
// Aurora Data Plane — Main Entry Point
// =============================================================================
//
// Composition root: every component receives its collaborators here, once.
//
//   vendor thread → bridge → adapter → ticks → data plane → events
//                                  ↘ error handler ↙
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use aurora_dataplane::error_recovery::{recovery_action, ErrorCategory, ErrorHandler, RecoveryStrategy};
use aurora_dataplane::events::EventPublisher;
use aurora_dataplane::market_data::adapter::SERVICE_NAME;
use aurora_dataplane::market_data::{AdapterError, MarketDataAdapter, WebSocketVendor};
use aurora_dataplane::pipeline::DataPlane;
use aurora_dataplane::runtime_config::RuntimeConfig;

const DEFAULT_CONFIG_PATH: &str = "dataplane_config.json";
const TICK_CHANNEL_CAPACITY: usize = 10_000;
const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Data Plane — Starting Up                   ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("AURORA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override symbols / vendor from env if available.
    if let Ok(syms) = std::env::var("AURORA_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(url) = std::env::var("AURORA_VENDOR_URL") {
        config.adapter.vendor_url = url;
    }

    info!(
        symbols = ?config.symbols,
        vendor_url = %config.adapter.vendor_url,
        base_timeframe = %config.candles.base_timeframe,
        "Configured data plane"
    );

    // ── 2. Error handler ─────────────────────────────────────────────────
    let errors = Arc::new(ErrorHandler::new(&config.errors));

    // ── 3. Outbound events ───────────────────────────────────────────────
    let publisher = EventPublisher::default();
    let mut event_log = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match event_log.recv().await {
                Ok(event) => debug!(
                    kind = event.kind(),
                    symbol = %event.symbol(),
                    payload = %serde_json::to_string(&event).unwrap_or_default(),
                    "event"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // ── 4. Market data adapter ───────────────────────────────────────────
    let (tick_tx, tick_rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
    let vendor = WebSocketVendor::new(config.adapter.vendor_url.clone());
    let adapter = Arc::new(MarketDataAdapter::new(
        config.adapter.clone(),
        vendor,
        errors.clone(),
        tick_tx,
    ));

    // Data-feed faults are recovered by re-sending the subscription set.
    let resync = adapter.clone();
    errors.register_recovery_strategy(
        ErrorCategory::DataFeed,
        RecoveryStrategy::retry(
            config.errors.retry.clone(),
            recovery_action(move || {
                let adapter = resync.clone();
                async move {
                    adapter
                        .resync_subscriptions()
                        .await
                        .map(|_| ())
                        .map_err(anyhow::Error::from)
                }
            }),
        ),
    );

    // ── 5. Data plane ────────────────────────────────────────────────────
    let (plane, plane_handle) = DataPlane::new(
        &config.candles,
        config.indicators.clone(),
        publisher.clone(),
        errors.clone(),
        tick_rx,
    );
    let plane_task = tokio::spawn(plane.run());

    for symbol in &config.symbols {
        plane_handle.add_symbol(symbol.clone()).await?;
    }

    // ── 6. Vendor connection ─────────────────────────────────────────────
    let runner = adapter.clone();
    tokio::spawn(async move { runner.run().await });

    if let Err(e) = adapter.subscribe(&config.symbols).await {
        error!(error = %e, "Initial subscription rejected");
    }

    let connector = adapter.clone();
    tokio::spawn(async move {
        match connector.connect().await {
            Ok(()) => info!("Vendor session established"),
            Err(AdapterError::ManuallyDisconnected) => info!("Vendor connect abandoned by shutdown"),
            Err(e) => error!(error = %e, "Vendor connect failed — waiting for operator reset"),
        }
    });

    // ── 7. Periodic stats ────────────────────────────────────────────────
    let stats_adapter = adapter.clone();
    let stats_plane = plane_handle.clone();
    let stats_errors = errors.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;

            let a = stats_adapter.stats();
            let p = match stats_plane.stats().await {
                Ok(p) => p,
                Err(_) => break,
            };
            info!(
                state = %a.state,
                ticks_received = a.ticks_received,
                normalize_errors = a.normalize_errors,
                dropped_events = a.dropped_events,
                dropped_notices = a.dropped_notices,
                subscribed = a.subscribed,
                pending = a.pending,
                ticks_processed = p.ticks_processed,
                ticks_untracked = p.ticks_untracked,
                candles = p.candles_completed,
                snapshots = p.snapshots_emitted,
                open_candles = p.open_candles,
                "data plane stats"
            );

            let e = stats_errors.get_error_stats();
            if e.total_errors > 0 {
                info!(
                    total = e.total_errors,
                    by_category = ?e.by_category,
                    rate_limited = ?e.rate_limited,
                    "error stats"
                );
            }
            if let Some(health) = stats_errors.get_service_health(SERVICE_NAME) {
                if !health.healthy {
                    warn!(
                        service = SERVICE_NAME,
                        last_error = ?health.last_error,
                        errors = health.error_count,
                        "service unhealthy"
                    );
                }
            }
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = adapter.disconnect().await {
        error!(error = %e, "Vendor disconnect failed");
    }

    match plane_handle.shutdown().await {
        Ok(flushed) => info!(flushed, "Open candles force-completed"),
        Err(e) => error!(error = %e, "Data plane already stopped"),
    }
    if let Err(e) = plane_task.await {
        error!(error = %e, "Data plane task failed");
    }

    info!("Aurora data plane shut down complete.");
    Ok(())
}
