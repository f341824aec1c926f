//! Reconnection supervisor: keeps one store connection and its LISTEN
//! subscriptions alive for as long as the process runs.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (stream error) -> Disconnected
//! ```
//!
//! A failed connect or a dropped stream waits out the next [`Backoff`]
//! delay before the following attempt; reaching `Connected` resets it.
//! Every channel is LISTENed before the state flips to `Connected`, and the
//! handlers' backlogs are dispatched right after, so events sent while
//! disconnected are picked up from the table instead of being lost.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tracing::{info, warn};

use crate::error::Result;
use crate::listener::{ChangeListener, NotificationSource};
use crate::retry::Backoff;
use crate::telemetry::metrics;

/// Connection state as reported to health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opens a fresh connection subscribed to `channels`.
#[async_trait]
pub trait Connector: Send + Sync {
    type Source: NotificationSource + 'static;

    async fn connect(&self, channels: &[String]) -> Result<Self::Source>;
}

/// Cloneable trigger for a graceful stop.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<Notify>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.notify_one();
    }
}

pub struct Supervisor<C> {
    connector: C,
    listener: ChangeListener,
    backoff: Backoff,
    grace: Duration,
    state: watch::Sender<ConnectionState>,
    shutdown: Arc<Notify>,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(connector: C, listener: ChangeListener, backoff: Backoff) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            listener,
            backoff,
            grace: Duration::from_secs(10),
            state,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// How long in-flight handlers get to finish on shutdown.
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Live view of the connection state.
    pub fn health(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    /// Run until shutdown. Returns the backoff state at exit.
    pub async fn run(mut self) -> Backoff {
        let channels = self.listener.channels();
        info!(?channels, "supervisor started");
        let mut connected_before = false;

        loop {
            self.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                _ = self.shutdown.notified() => break,
                res = self.connector.connect(&channels) => res,
            };

            match connected {
                Ok(mut source) => {
                    self.backoff.reset();
                    if connected_before {
                        metrics::reconnects().add(1, &[]);
                    }
                    connected_before = true;
                    self.set_state(ConnectionState::Connected);
                    self.listener.catch_up().await;

                    let ended = tokio::select! {
                        _ = self.shutdown.notified() => None,
                        res = self.listener.run(&mut source) => Some(res),
                    };
                    let Some(res) = ended else { break };

                    self.set_state(ConnectionState::Disconnected);
                    match res {
                        Err(e) => warn!("notification stream lost: {e}"),
                        Ok(()) => warn!("notification stream ended"),
                    }
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(attempt = self.backoff.attempt() + 1, "connect failed: {e}");
                }
            }

            let delay = self.backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("supervisor shutting down");
        self.set_state(ConnectionState::Disconnected);
        self.listener.drain(self.grace).await;
        self.backoff
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "connection state changed");
        }
    }
}
