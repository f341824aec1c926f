//! Ordered database URLs with one active pool.
//!
//! Every (re)connect walks the URLs from the first. The pool already in use
//! is reused when its URL comes up, so a healthy primary costs nothing and a
//! recovered primary wins back from the fallback. Store calls always go to
//! whichever pool won the latest connect.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::Db;
use crate::error::{Error, Result};
use crate::model::work::{Stage, WorkId, WorkItem};
use crate::store::{WorkStore, WriteOutcome};

#[derive(Clone)]
struct Active {
    index: usize,
    db: Db,
}

pub struct FailoverDb {
    urls: Vec<SecretString>,
    active: RwLock<Option<Active>>,
}

impl FailoverDb {
    /// Nothing is connected until [`FailoverDb::connect`] succeeds.
    pub fn new(urls: Vec<SecretString>) -> Self {
        Self {
            urls,
            active: RwLock::new(None),
        }
    }

    /// Position of the URL currently serving requests.
    pub async fn active_index(&self) -> Option<usize> {
        self.active.read().await.as_ref().map(|a| a.index)
    }

    /// The pool currently serving requests.
    pub async fn current(&self) -> Result<Db> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|a| a.db.clone())
            .ok_or_else(|| Error::Other("no database connection".to_string()))
    }

    /// Connect to the first reachable URL and make it active.
    pub async fn connect(&self) -> Result<Db> {
        let (db, ()) = self
            .first_reachable(|db| async move { db.health_check().await })
            .await?;
        Ok(db)
    }

    /// Walk the URLs in order. The first candidate whose pool passes `check`
    /// becomes active and the check's value is returned with it.
    pub(crate) async fn first_reachable<T, F, Fut>(&self, check: F) -> Result<(Db, T)>
    where
        F: Fn(Db) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let current = self.active.read().await.clone();

        // built from an existing pool: nothing else to try
        if self.urls.is_empty() {
            let active = current
                .ok_or_else(|| Error::Config("no database URL configured".to_string()))?;
            let value = check(active.db.clone()).await?;
            return Ok((active.db, value));
        }

        let total = self.urls.len();
        let mut last_err = None;
        for (index, url) in self.urls.iter().enumerate() {
            let reused = current.as_ref().filter(|a| a.index == index);
            let db = match reused {
                Some(active) => active.db.clone(),
                None => match Db::connect(url.expose_secret()).await {
                    Ok(db) => db,
                    Err(e) => {
                        warn!(candidate = index + 1, of = total, "database connection failed: {e}");
                        last_err = Some(e);
                        continue;
                    }
                },
            };

            match check(db.clone()).await {
                Ok(value) => {
                    if reused.is_none() {
                        self.activate(index, db.clone()).await;
                    }
                    return Ok((db, value));
                }
                Err(e) => {
                    warn!(candidate = index + 1, of = total, "database unusable: {e}");
                    if reused.is_none() {
                        db.close().await;
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Config("no database URL configured".to_string())))
    }

    async fn activate(&self, index: usize, db: Db) {
        let previous = self.active.write().await.replace(Active { index, db });
        info!(candidate = index + 1, of = self.urls.len(), "connected to database");
        if let Some(old) = previous {
            info!(from = old.index + 1, to = index + 1, "switched database");
            // in-flight queries finish on the old pool before it closes
            tokio::spawn(async move { old.db.close().await });
        }
    }

    pub async fn close(&self) {
        if let Some(active) = self.active.write().await.take() {
            active.db.close().await;
        }
    }
}

impl From<Db> for FailoverDb {
    fn from(db: Db) -> Self {
        Self {
            urls: Vec::new(),
            active: RwLock::new(Some(Active { index: 0, db })),
        }
    }
}

#[async_trait]
impl WorkStore for FailoverDb {
    async fn insert(&self, question: &str) -> Result<WorkId> {
        self.current().await?.insert(question).await
    }

    async fn fetch(&self, id: WorkId) -> Result<Option<WorkItem>> {
        self.current().await?.fetch(id).await
    }

    async fn set_output(&self, stage: Stage, id: WorkId, text: &str) -> Result<WriteOutcome> {
        self.current().await?.set_output(stage, id, text).await
    }

    async fn set_output_if_empty(
        &self,
        stage: Stage,
        id: WorkId,
        text: &str,
    ) -> Result<WriteOutcome> {
        self.current().await?.set_output_if_empty(stage, id, text).await
    }

    async fn delete(&self, id: WorkId) -> Result<Option<Option<String>>> {
        self.current().await?.delete(id).await
    }

    async fn list_ids(&self) -> Result<Vec<WorkId>> {
        self.current().await?.list_ids().await
    }

    async fn list_pending(&self, stage: Stage) -> Result<Vec<WorkId>> {
        self.current().await?.list_pending(stage).await
    }
}
