//! Screen Recorder Service
//!
//! Headless recording daemon: owns the capture session controller, keeps the
//! recording indicator in sync, and exposes a local HTTP control API.

mod broker;
mod config;
mod error;
mod keepalive;
mod routes;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use capture_session::{Backends, KeepAlive, SessionController, SessionEvent};
use clap::Parser;
use media_store::{FileSystemStore, OrphanAction};
use recorder_shared::AuthorizationRequest;
use tracing::{error, info, warn};

use crate::broker::{ConsentBroker, ConsentPolicy};
use crate::config::{Cli, ServiceConfig};
use crate::keepalive::StatusAnnouncer;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServiceConfig::load(&cli)?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log_filter))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting screen recorder service");
    info!("Recordings directory: {}", config.output_dir.display());

    let store = Arc::new(FileSystemStore::new(&config.output_dir));
    match store.recover_orphans() {
        Ok(recovered) => {
            for orphan in recovered {
                match orphan.action {
                    OrphanAction::Removed => {
                        info!("Removed empty leftover {}", orphan.path.display())
                    }
                    OrphanAction::Preserved(path) => warn!(
                        "Interrupted recording kept as {} ({} bytes)",
                        path.display(),
                        orphan.bytes
                    ),
                }
            }
        }
        Err(e) => warn!("Orphan recovery failed: {}", e),
    }

    let announcer = Arc::new(StatusAnnouncer::new());
    let session_config = config.session_config();
    let backends = Backends::software(
        store,
        announcer.clone() as Arc<dyn KeepAlive>,
        &session_config,
    );
    let controller = SessionController::new(backends, session_config);
    controller.on_event(Arc::new(|event| {
        if let SessionEvent::RecordingFinished(summary) = event {
            info!(
                "Recording finished: {} ({:?})",
                summary.location.display(),
                summary.integrity
            );
        }
    }));

    let policy = if config.auto_grant {
        ConsentPolicy::AutoGrant
    } else {
        ConsentPolicy::DenyAll
    };
    let broker = Arc::new(ConsentBroker::new(
        policy,
        config.token_ttl(),
        config.width,
        config.height,
    ));

    let heartbeat = tokio::spawn(keepalive::run_heartbeat(
        announcer.clone(),
        controller.clone(),
        config.heartbeat_interval(),
    ));

    let state = AppState {
        controller: controller.clone(),
        broker,
        announcer,
        defaults: AuthorizationRequest {
            frame_rate: config.default_frame_rate,
            quality: config.default_quality,
        },
    };
    let app = routes::router(state);

    info!("Listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    heartbeat.abort();

    // Finalize anything still recording before the process exits
    match tokio::task::spawn_blocking(move || controller.shutdown()).await {
        Ok(Some(summary)) => info!("Saved in-progress recording: {}", summary.location.display()),
        Ok(None) => {}
        Err(e) => error!("Shutdown teardown panicked: {}", e),
    }

    info!("Screen recorder service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
