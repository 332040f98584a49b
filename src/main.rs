//! Frame Mirror demo host
//!
//! Builds the mirror over an in-memory scene and pumps it the way a game
//! client would:
//! - a JSON scene file, or a seeded arena when none is configured
//! - the frame-stage scheduler driven at the configured frame rate
//! - grenade predictions logged from a script callback

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use frame_mirror::config::Config;
use frame_mirror::grenade::GrenadePredictor;
use frame_mirror::host::driver::{install_prediction_logger, DemoDriver};
use frame_mirror::host::{KeyValueStore, MemoryStore, SceneHost};
use frame_mirror::scheduler::FrameScheduler;
use frame_mirror::trace::TraceEngine;
use frame_mirror::SnapshotStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting Frame Mirror demo host");

    let convars: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::with_defaults());
    let host = match &config.scene_path {
        Some(path) => SceneHost::from_scene_file(path)?,
        None => SceneHost::from_seed(config.demo_seed, config.tickrate),
    };
    let host = Arc::new(host.with_convars(convars.clone()));
    let weapons = host.weapon_table().unwrap_or_default();

    let store = Arc::new(SnapshotStore::new(host.clone()));
    let trace = Arc::new(TraceEngine::new(
        store.clone(),
        host.world(),
        Arc::new(weapons),
        config.smoke_opaque_depth,
    ));
    let predictor = Arc::new(GrenadePredictor::new(
        store.clone(),
        trace.clone(),
        convars,
        config.predictor_settings(),
    ));
    let scheduler = Arc::new(FrameScheduler::new(host.clone(), store, trace, predictor));
    install_prediction_logger(&scheduler);

    let summary = DemoDriver::new(host, scheduler, config.host_fps, config.demo_seed)
        .with_frame_limit(config.demo_frames)
        .run(shutdown_signal())
        .await;

    info!(summary = %serde_json::to_string(&summary)?, "Demo host shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
