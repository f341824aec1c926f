//! Process lifecycle for one stage worker.
//!
//! The health endpoint comes up first, so health checks see `disconnected`
//! while the first connect is still being retried. Only once the caller's
//! readiness future (connect plus migrations) resolves does the supervisor
//! start. A stop request is honoured at any point.

use std::future::Future;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::health;
use crate::supervisor::{Connector, Supervisor};

/// Resolves on SIGINT, or SIGTERM where the platform has it.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                }
                return;
            }
            Err(e) => warn!("cannot listen for SIGTERM: {e}"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("cannot listen for SIGINT: {e}");
        return std::future::pending().await;
    }
    info!("received SIGINT");
}

/// Run a worker until `stop` resolves.
///
/// Returns `Ok(false)` if stopped before `ready` finished, `Ok(true)` after
/// a supervised run, and the readiness error if `ready` fails.
pub async fn run<C, R, S>(
    supervisor: Supervisor<C>,
    stage: &str,
    health_listener: Option<TcpListener>,
    ready: R,
    stop: S,
) -> Result<bool>
where
    C: Connector,
    R: Future<Output = Result<()>>,
    S: Future<Output = ()> + Send + 'static,
{
    if let Some(listener) = health_listener {
        let router = health::router(stage, supervisor.health());
        tokio::spawn(async move {
            if let Err(e) = health::serve(listener, router).await {
                error!("health endpoint stopped: {e}");
            }
        });
    }

    let mut stop = Box::pin(stop);
    tokio::select! {
        result = ready => result?,
        _ = &mut stop => {
            info!("stopped before the worker was ready");
            return Ok(false);
        }
    }

    let handle = supervisor.shutdown_handle();
    tokio::spawn(async move {
        stop.await;
        handle.shutdown();
    });

    supervisor.run().await;
    Ok(true)
}
