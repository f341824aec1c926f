//! In-process work store with the same notification behaviour as the
//! Postgres triggers.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

use super::{WorkStore, WriteOutcome};
use crate::error::{Error, Result};
use crate::listener::{Notification, NotificationSource};
use crate::model::work::{ANSWER_READY, QUESTION_PENDING, Stage, WorkId, WorkItem};
use crate::supervisor::Connector;

#[derive(Default)]
struct Inner {
    last_id: i64,
    rows: BTreeMap<WorkId, WorkItem>,
}

/// Work store held in memory. Notifications go out on a broadcast channel
/// while the row lock is held, so events are ordered with their mutations.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<Notification>,
    writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
            writes: AtomicUsize::new(0),
        }
    }

    /// Raw event stream, every channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    /// A notification source limited to `channels`.
    pub fn notifications(&self, channels: &[String]) -> MemoryNotifications {
        MemoryNotifications {
            rx: self.events.subscribe(),
            channels: channels.to_vec(),
        }
    }

    /// Number of mutating calls that changed a row.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Other("memory store lock poisoned".to_string()))
    }

    fn emit(&self, channel: &str, id: WorkId) {
        // no receivers is fine
        let _ = self.events.send(Notification::new(channel, id.to_string()));
    }

    fn write(
        &self,
        inner: &mut Inner,
        stage: Stage,
        id: WorkId,
        text: &str,
        only_if_empty: bool,
    ) -> WriteOutcome {
        let Some(item) = inner.rows.get_mut(&id) else {
            return WriteOutcome::NotFound;
        };
        let slot = match stage {
            Stage::Answer => &mut item.answer,
            Stage::Speech => &mut item.audio,
        };
        if only_if_empty && slot.is_some() {
            return WriteOutcome::AlreadySet;
        }
        let was_empty = slot.is_none();
        *slot = Some(text.to_string());
        item.updated_at = Utc::now();
        self.writes.fetch_add(1, Ordering::SeqCst);

        if stage == Stage::Answer && was_empty {
            self.emit(ANSWER_READY, id);
        }
        WriteOutcome::Written
    }
}

#[async_trait]
impl WorkStore for MemoryStore {
    async fn insert(&self, question: &str) -> Result<WorkId> {
        let mut inner = self.lock()?;
        inner.last_id += 1;
        let id = WorkId(inner.last_id);
        let now = Utc::now();
        inner.rows.insert(
            id,
            WorkItem {
                id,
                question: question.to_string(),
                answer: None,
                audio: None,
                created_at: now,
                updated_at: now,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.emit(QUESTION_PENDING, id);
        Ok(id)
    }

    async fn fetch(&self, id: WorkId) -> Result<Option<WorkItem>> {
        Ok(self.lock()?.rows.get(&id).cloned())
    }

    async fn set_output(&self, stage: Stage, id: WorkId, text: &str) -> Result<WriteOutcome> {
        let mut inner = self.lock()?;
        Ok(self.write(&mut inner, stage, id, text, false))
    }

    async fn set_output_if_empty(
        &self,
        stage: Stage,
        id: WorkId,
        text: &str,
    ) -> Result<WriteOutcome> {
        let mut inner = self.lock()?;
        Ok(self.write(&mut inner, stage, id, text, true))
    }

    async fn delete(&self, id: WorkId) -> Result<Option<Option<String>>> {
        let removed = self.lock()?.rows.remove(&id);
        if removed.is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed.map(|item| item.audio))
    }

    async fn list_ids(&self) -> Result<Vec<WorkId>> {
        Ok(self.lock()?.rows.keys().rev().copied().collect())
    }

    async fn list_pending(&self, stage: Stage) -> Result<Vec<WorkId>> {
        let inner = self.lock()?;
        Ok(inner
            .rows
            .values()
            .filter(|item| item.output(stage).is_none())
            .filter(|item| {
                stage
                    .prerequisite()
                    .is_none_or(|pre| item.output(pre).is_some())
            })
            .map(|item| item.id)
            .collect())
    }
}

/// Channel-filtered view of a [`MemoryStore`]'s events.
pub struct MemoryNotifications {
    rx: broadcast::Receiver<Notification>,
    channels: Vec<String>,
}

#[async_trait]
impl NotificationSource for MemoryNotifications {
    async fn recv(&mut self) -> Result<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(n) if self.channels.contains(&n.channel) => return Ok(n),
                Ok(_) => continue,
                // a lagged receiver has lost events, same as a dropped connection
                Err(_) => return Err(Error::StreamClosed),
            }
        }
    }
}

#[async_trait]
impl Connector for std::sync::Arc<MemoryStore> {
    type Source = MemoryNotifications;

    async fn connect(&self, channels: &[String]) -> Result<Self::Source> {
        Ok(self.notifications(channels))
    }
}
