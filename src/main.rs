//! Table orchestrator - main entry point
//!
//! Runs the multi-table orchestration loop as a daemon. The live browser
//! driver and recognizer are external; this binary drives the deterministic
//! replay surface in their place, so the full capture → extract → decide →
//! act path can be exercised end to end from configuration alone.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use table_orchestrator::{
    demo_round_script, Config, EventSender, MonitorEvent, MultiTableCoordinator, Point,
    ReplayExtractor, ReplaySurface, Surface,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.general.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting table orchestrator");

    if !config.general.enabled {
        info!("Orchestrator is disabled in configuration, exiting");
        return Ok(());
    }

    let (events, mut monitor_rx, mut round_rx) = EventSender::channel(256);

    let surface = Arc::new(ReplaySurface::new(Point::new(0, 0)));
    let extractor = Arc::new(ReplayExtractor::new());
    let coordinator = Arc::new(MultiTableCoordinator::new(
        surface.clone() as Arc<dyn Surface>,
        extractor,
        config.coordinator_settings(),
        events,
    ));

    for table in &config.tables {
        surface
            .script_table(table.id, demo_round_script(config.run.replay_rounds))
            .await;
        coordinator
            .register_table(table.id, table.layout(), table.rules.as_deref())
            .await?;
    }
    info!(
        "{} tables registered, replaying {} rounds each",
        config.tables.len(),
        config.run.replay_rounds
    );

    // Completed rounds go to the persistence consumer; here that is a JSON
    // log sink standing in for the session writer.
    tokio::spawn(async move {
        while let Some(event) = round_rx.recv().await {
            match serde_json::to_string(&event.record) {
                Ok(json) => info!("table {} round: {json}", event.table_id),
                Err(err) => warn!("failed to serialize round record: {err}"),
            }
        }
    });

    // Status and alert events feed the control surface.
    tokio::spawn(async move {
        while let Some(event) = monitor_rx.recv().await {
            match event {
                MonitorEvent::Status(status) => debug!(
                    "table {} [{}] timer {:?} history {:?} decision {:?}",
                    status.table_id,
                    status.status.as_str(),
                    status.timer,
                    status.round_history,
                    status.decision.map(|d| d.as_str())
                ),
                MonitorEvent::Error(error) => warn!(
                    "table {} {} alert: {}",
                    error.table_id, error.category, error.message
                ),
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    coordinator.run_loop(shutdown_rx).await;
    coordinator.stop_all().await;

    for (id, stats) in coordinator.statistics().await {
        info!(
            "table {id}: {} rounds, {}/{} decisions correct ({:.1}%)",
            stats.rounds_observed,
            stats.correct_decisions,
            stats.total_decisions,
            stats.accuracy_percent
        );
    }

    info!("Exiting");
    Ok(())
}
