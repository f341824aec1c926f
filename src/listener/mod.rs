//! Change listener: turns a notification stream into per-id handler calls.
//!
//! Dispatch is fire-and-forget. Each notification spawns its handler onto a
//! `JoinSet` and the read loop goes straight back to the stream, so a slow
//! capability call never delays the next event. Handler failures and panics
//! are logged when the task is reaped and never end the subscription. A
//! stream error ends [`ChangeListener::run`] so the supervisor can reconnect.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::model::work::WorkId;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// One notification as delivered by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

impl Notification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// A live subscription on one store connection.
///
/// `recv` returns an error once the connection is gone; the source is then
/// dead and must be replaced through the supervisor's connector.
#[async_trait]
pub trait NotificationSource: Send {
    async fn recv(&mut self) -> Result<Notification>;
}

/// Something that processes a work-item id from a channel.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, id: WorkId) -> Result<()>;

    /// Ids that are waiting for this handler right now. Dispatched after every
    /// (re)connect to cover notifications sent while nobody was listening.
    async fn backlog(&self) -> Result<Vec<WorkId>> {
        Ok(Vec::new())
    }
}

/// Routes notifications by channel to their handlers.
#[derive(Default)]
pub struct ChangeListener {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    in_flight: JoinSet<()>,
}

impl ChangeListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `channel`. Takes effect on the next connect.
    pub fn subscribe(&mut self, channel: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(channel.into(), handler);
    }

    /// Channels that must be LISTENed on every connection.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.handlers.keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Handler calls that have not been reaped yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Read `source` until it fails, dispatching every notification.
    pub async fn run<S: NotificationSource + ?Sized>(&mut self, source: &mut S) -> Result<()> {
        loop {
            let notification = source.recv().await?;
            self.reap();
            self.dispatch(notification);
        }
    }

    /// Decode and spawn the handler for one notification.
    pub fn dispatch(&mut self, notification: Notification) {
        metrics::events_received().add(
            1,
            &[KeyValue::new("channel", notification.channel.clone())],
        );

        let Some(handler) = self.handlers.get(&notification.channel) else {
            debug!(channel = %notification.channel, "notification on unsubscribed channel");
            return;
        };

        let id = match notification.payload.parse::<WorkId>() {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    channel = %notification.channel,
                    payload = %notification.payload,
                    "undecodable notification payload: {e}"
                );
                return;
            }
        };

        self.spawn(notification.channel, id, Arc::clone(handler));
    }

    /// Dispatch every handler's backlog.
    pub async fn catch_up(&mut self) {
        let handlers: Vec<(String, Arc<dyn EventHandler>)> = self
            .handlers
            .iter()
            .map(|(c, h)| (c.clone(), Arc::clone(h)))
            .collect();

        for (channel, handler) in handlers {
            match handler.backlog().await {
                Ok(ids) if ids.is_empty() => {}
                Ok(ids) => {
                    info!(%channel, count = ids.len(), "dispatching backlog");
                    for id in ids {
                        self.spawn(channel.clone(), id, Arc::clone(&handler));
                    }
                }
                Err(e) => warn!(%channel, "backlog scan failed: {e}"),
            }
        }
    }

    /// Wait up to `grace` for in-flight handlers, then abort the rest.
    pub async fn drain(&mut self, grace: Duration) {
        if self.in_flight.is_empty() {
            return;
        }
        info!(in_flight = self.in_flight.len(), "waiting for in-flight handlers");

        let waited = tokio::time::timeout(grace, async {
            while let Some(res) = self.in_flight.join_next().await {
                log_join(res);
            }
        })
        .await;

        if waited.is_err() {
            warn!(
                abandoned = self.in_flight.len(),
                "grace period expired, abandoning in-flight handlers"
            );
            self.in_flight.abort_all();
            while self.in_flight.join_next().await.is_some() {}
        }
    }

    fn spawn(&mut self, channel: String, id: WorkId, handler: Arc<dyn EventHandler>) {
        debug!(%channel, %id, "dispatching");
        self.in_flight.spawn(async move {
            if let Err(e) = handler.handle(id).await {
                error!(%channel, %id, "handler failed: {e}");
            }
        });
    }

    fn reap(&mut self) {
        while let Some(res) = self.in_flight.try_join_next() {
            log_join(res);
        }
    }
}

fn log_join(res: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            error!("handler panicked: {e}");
        }
    }
}
