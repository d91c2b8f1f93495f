//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - SIGHUP reloads the configuration file
//! - SIGTERM/SIGINT trigger shutdown
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A failed reload is logged and the loop keeps running

use crate::config::ConfigEngine;
use crate::error::EngineError;
use crate::lifecycle::Shutdown;

/// What the host should do in response to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Reload,
    Terminate,
}

/// Wait for the next relevant signal.
#[cfg(unix)]
pub async fn next_signal() -> std::io::Result<SignalAction> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = hangup.recv() => Ok(SignalAction::Reload),
        _ = terminate.recv() => Ok(SignalAction::Terminate),
        res = tokio::signal::ctrl_c() => res.map(|_| SignalAction::Terminate),
    }
}

#[cfg(not(unix))]
pub async fn next_signal() -> std::io::Result<SignalAction> {
    tokio::signal::ctrl_c().await.map(|_| SignalAction::Terminate)
}

/// Reload on SIGHUP until a termination signal arrives or `shutdown` fires.
pub async fn run_signal_loop(engine: ConfigEngine, shutdown: Shutdown) {
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        let action = tokio::select! {
            _ = shutdown_rx.recv() => return,
            action = next_signal() => action,
        };

        match action {
            Ok(SignalAction::Reload) => {
                tracing::info!("SIGHUP received, reloading configuration");
                match engine.reload().await {
                    Ok(report) => tracing::info!(
                        committed = report.committed,
                        generation = report.generation,
                        "Reload finished"
                    ),
                    Err(EngineError::Busy) => tracing::warn!("Reload skipped, pipeline busy"),
                    Err(e) => tracing::warn!(error = %e, "Reload failed"),
                }
            }
            Ok(SignalAction::Terminate) => {
                tracing::info!("Termination signal received, shutting down");
                shutdown.trigger();
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handlers");
                shutdown.trigger();
                return;
            }
        }
    }
}
