//! quarryd — Quarry analytical computation daemon.

use std::time::Duration;

use anyhow::Result;

use quarry_api::ApiState;
use quarry_core::config::QuarryConfig;
use quarry_services::HostCoordinator;

/// How often finished requests past their retention are swept.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = QuarryConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = QuarryConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        QuarryConfig::default()
    });
    tracing::info!(
        max_concurrent_tasks = config.engine.max_concurrent_tasks,
        large_graph_nodes = config.engine.large_graph_nodes,
        large_graph_links = config.engine.large_graph_links,
        "quarryd starting"
    );

    let coordinator = HostCoordinator::new(config.engine.clone());

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let api_task = {
        let state = ApiState::new(coordinator.clone());
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = quarry_api::serve(state, port).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    let pruner = {
        let store = coordinator.store().clone();
        let retention_ms = config.store.retention_secs.saturating_mul(1000);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                if retention_ms == 0 {
                    continue;
                }
                let cutoff = now_ms().saturating_sub(retention_ms);
                let removed = store.prune_finished(cutoff);
                if removed > 0 {
                    tracing::debug!(removed, "pruned finished requests");
                }
                let counts = store.counts();
                tracing::info!(
                    queued = counts.queued,
                    running = counts.running,
                    completed = counts.completed,
                    failed = counts.failed,
                    cancelled = counts.cancelled,
                    "request table snapshot"
                );
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = api_task           => tracing::error!("API task exited: {:?}", r),
        r = pruner             => tracing::error!("pruner exited: {:?}", r),
    }

    let in_flight = coordinator.in_flight();
    if in_flight > 0 {
        tracing::warn!(in_flight, "abandoning in-flight requests");
    }
    Ok(())
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
