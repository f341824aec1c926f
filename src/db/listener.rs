//! LISTEN/NOTIFY over a dedicated `PgListener` connection.
//!
//! `PgListener::recv` silently reconnects and drops whatever was sent in
//! between. We use `try_recv` instead, which reports the lost connection,
//! and let the supervisor rebuild the listener and run the backlog scan.

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use std::sync::Arc;

use super::FailoverDb;
use crate::error::{Error, Result};
use crate::listener::{Notification, NotificationSource};
use crate::supervisor::Connector;

/// Opens a `PgListener` on the first reachable database, trying the
/// configured URLs in order on every attempt.
#[derive(Clone)]
pub struct PgConnector {
    dbs: Arc<FailoverDb>,
}

impl PgConnector {
    pub fn new(dbs: Arc<FailoverDb>) -> Self {
        Self { dbs }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Source = PgNotifications;

    async fn connect(&self, channels: &[String]) -> Result<Self::Source> {
        let (_, listener) = self
            .dbs
            .first_reachable(|db| async move {
                let mut listener = PgListener::connect_with(db.pool()).await?;
                listener
                    .listen_all(channels.iter().map(String::as_str))
                    .await?;
                Ok::<_, Error>(listener)
            })
            .await?;
        Ok(PgNotifications { listener })
    }
}

pub struct PgNotifications {
    listener: PgListener,
}

#[async_trait]
impl NotificationSource for PgNotifications {
    async fn recv(&mut self) -> Result<Notification> {
        match self.listener.try_recv().await? {
            Some(n) => Ok(Notification::new(n.channel(), n.payload())),
            None => Err(Error::StreamClosed),
        }
    }
}
