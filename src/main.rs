//! Egret daemon - Entry Point
//!
//! Wires the engine to its collaborators, restores persisted state,
//! starts the background loops and shuts everything down gracefully.

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use egret::config::Config;
use egret::engine::{Engine, EngineConfig};
use egret::hooks;
use egret::notify::DesktopNotifier;
use egret::persist;
use egret::source::GeonodeSource;
use egret::{Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> egret::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "egret=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Egret");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");

    // Wire the engine to its collaborators
    let source = Arc::new(GeonodeSource::new(&config.source)?);
    let engine_config = EngineConfig {
        filter: config.filter.clone(),
        max_attempts: config.rotation.max_attempts,
        probe_timeout: config.probe.timeout_duration(),
        max_history: config.rotation.max_history,
        notifications: config.notifications,
        state_path: Some(config.persistence.state_path.clone()),
    };
    let hook_set = hooks::build_hooks(&config.hooks);
    info!("Configured {} activation hooks", hook_set.len());

    let engine = Engine::with_http_prober(
        engine_config,
        config.probe.clone(),
        source,
        hook_set,
        Arc::new(DesktopNotifier),
    );

    // Restore persisted state for restart continuity
    match persist::load_favorites(&config.persistence.favorites_path).await {
        Ok(Some(favorites)) => {
            info!("Loaded {} favorites", favorites.len());
            engine.set_favorites(favorites);
        }
        Ok(None) => {}
        Err(e) => warn!("Failed to load favorites: {}", e),
    }
    match persist::load_snapshot(&config.persistence.state_path).await {
        Ok(Some(snapshot)) => {
            engine.restore(snapshot);
            info!(
                "State restored: {} pooled proxies, current = {}",
                engine.pool_len(),
                engine
                    .current()
                    .map(|a| a.record.address())
                    .unwrap_or_else(|| "none".to_string())
            );
        }
        Ok(None) => {}
        Err(e) => warn!("Failed to load state snapshot: {}", e),
    }

    // Acquire an initial pool if the restored one is empty
    if engine.pool_len() == 0 {
        if let Err(e) = engine.refresh_pool().await {
            warn!("Initial pool fetch failed: {} (will retry on demand)", e);
        }
    }

    // Start background loops
    let scheduler = Scheduler::new(engine.clone(), SchedulerConfig::default());
    if config.monitors.failover_watch {
        scheduler.start_failover_watch();
    }
    if config.monitors.uptime_monitor {
        scheduler.start_uptime_monitor();
    }
    if config.rotation.auto_start {
        info!("Auto-starting rotation per configuration");
        scheduler.start_rotation(config.rotation.interval(), config.rotation.duration());
    }

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    // Stop loops (bounded join) and persist final state
    scheduler.shutdown().await;

    if let Err(e) = persist::save_snapshot(&config.persistence.state_path, &engine.snapshot()).await
    {
        error!("Failed to save state snapshot: {}", e);
    }
    if let Err(e) =
        persist::save_favorites(&config.persistence.favorites_path, &engine.favorites()).await
    {
        error!("Failed to save favorites: {}", e);
    }

    info!("Egret stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
