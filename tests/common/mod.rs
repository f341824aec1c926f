//! Fakes shared by the integration tests: scripted capabilities, a
//! channel-backed notification source, a scripted connector and a
//! recording handler.

#![allow(dead_code)]

use async_trait::async_trait;
use clipboard_tts::capability::{CapabilityError, SpeechSynthesizer, TextGenerator};
use clipboard_tts::error::{Error, Result};
use clipboard_tts::listener::{EventHandler, Notification, NotificationSource};
use clipboard_tts::model::work::WorkId;
use clipboard_tts::supervisor::Connector;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Replays scripted results, then repeats `otherwise` forever.
pub struct Script<T> {
    queue: Mutex<VecDeque<std::result::Result<T, CapabilityError>>>,
    otherwise: std::result::Result<T, CapabilityError>,
    calls: Mutex<Vec<Instant>>,
}

impl<T: Clone> Script<T> {
    pub fn new(
        scripted: Vec<std::result::Result<T, CapabilityError>>,
        otherwise: std::result::Result<T, CapabilityError>,
    ) -> Self {
        Self {
            queue: Mutex::new(scripted.into()),
            otherwise,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always(result: std::result::Result<T, CapabilityError>) -> Self {
        Self::new(Vec::new(), result)
    }

    fn next(&self) -> std::result::Result<T, CapabilityError> {
        self.calls.lock().unwrap().push(Instant::now());
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.otherwise.clone())
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Gaps between consecutive calls.
    pub fn gaps(&self) -> Vec<Duration> {
        let calls = self.calls.lock().unwrap();
        calls.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

pub type ScriptedGenerator = Script<String>;
pub type ScriptedSynthesizer = Script<Vec<u8>>;

#[async_trait]
impl TextGenerator for Script<String> {
    async fn generate(&self, _prompt: &str) -> std::result::Result<String, CapabilityError> {
        self.next()
    }
}

#[async_trait]
impl SpeechSynthesizer for Script<Vec<u8>> {
    async fn synthesize(&self, _text: &str) -> std::result::Result<Vec<u8>, CapabilityError> {
        self.next()
    }
}

/// A generator that never answers.
pub struct HangingGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for HangingGenerator {
    async fn generate(&self, _prompt: &str) -> std::result::Result<String, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Asserts the `delays` are what elapsed between calls, to the millisecond.
pub fn assert_gaps(actual: &[Duration], expected_secs: &[u64]) {
    assert_eq!(actual.len(), expected_secs.len(), "gaps: {actual:?}");
    for (gap, secs) in actual.iter().zip(expected_secs) {
        let expected = Duration::from_secs(*secs);
        assert!(
            *gap >= expected && *gap < expected + Duration::from_millis(50),
            "expected ~{expected:?}, got {gap:?} (all gaps: {actual:?})"
        );
    }
}

// ---------------------------------------------------------------------------
// Notification plumbing
// ---------------------------------------------------------------------------

/// Notification source fed from a test-held sender. Dropping the sender
/// looks like a lost connection.
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<Notification>>,
}

impl ChannelSource {
    pub fn pair() -> (mpsc::Sender<Result<Notification>>, Self) {
        let (tx, rx) = mpsc::channel(64);
        (tx, Self { rx })
    }
}

#[async_trait]
impl NotificationSource for ChannelSource {
    async fn recv(&mut self) -> Result<Notification> {
        self.rx.recv().await.unwrap_or(Err(Error::StreamClosed))
    }
}

/// Connector that hands out scripted results in order, then hangs.
#[derive(Clone)]
pub struct ScriptedConnector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    script: Mutex<VecDeque<Result<ChannelSource>>>,
    attempts: Mutex<Vec<(Instant, Vec<String>)>>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Result<ChannelSource>>) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                script: Mutex::new(script.into()),
                attempts: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn attempts(&self) -> usize {
        self.inner.attempts.lock().unwrap().len()
    }

    pub fn gaps(&self) -> Vec<Duration> {
        let attempts = self.inner.attempts.lock().unwrap();
        attempts.windows(2).map(|w| w[1].0 - w[0].0).collect()
    }

    pub fn channels_at(&self, attempt: usize) -> Vec<String> {
        self.inner.attempts.lock().unwrap()[attempt].1.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Source = ChannelSource;

    async fn connect(&self, channels: &[String]) -> Result<ChannelSource> {
        self.inner
            .attempts
            .lock()
            .unwrap()
            .push((Instant::now(), channels.to_vec()));
        let next = self.inner.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}

pub fn refused() -> Result<ChannelSource> {
    Err(Error::Other("connection refused".to_string()))
}

/// Poll a future once. Memory-store calls never suspend, so they finish here.
pub fn poll_now<F: std::future::Future>(fut: F) -> Option<F::Output> {
    let mut cx = std::task::Context::from_waker(std::task::Waker::noop());
    let mut fut = std::pin::pin!(fut);
    match fut.as_mut().poll(&mut cx) {
        std::task::Poll::Ready(out) => Some(out),
        std::task::Poll::Pending => None,
    }
}

/// Poll `cond` every 10ms (virtual or real time) until it holds, or panic.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Records every id it sees. Can be told to fail or panic on given ids,
/// to block on an id until released, and to report a backlog.
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<WorkId>>,
    fail_on: Vec<WorkId>,
    panic_on: Vec<WorkId>,
    block_on: Option<WorkId>,
    release: Notify,
    backlog: Vec<WorkId>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, id: i64) -> Self {
        self.fail_on.push(WorkId(id));
        self
    }

    pub fn panicking_on(mut self, id: i64) -> Self {
        self.panic_on.push(WorkId(id));
        self
    }

    pub fn blocking_on(mut self, id: i64) -> Self {
        self.block_on = Some(WorkId(id));
        self
    }

    pub fn with_backlog(mut self, ids: &[i64]) -> Self {
        self.backlog = ids.iter().copied().map(WorkId).collect();
        self
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn seen(&self) -> Vec<WorkId> {
        let mut seen = self.seen.lock().unwrap().clone();
        seen.sort();
        seen
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, id: WorkId) -> Result<()> {
        if self.block_on == Some(id) {
            self.release.notified().await;
        }
        self.seen.lock().unwrap().push(id);
        if self.panic_on.contains(&id) {
            panic!("handler blew up on {id}");
        }
        if self.fail_on.contains(&id) {
            return Err(Error::Other(format!("handler failed on {id}")));
        }
        Ok(())
    }

    async fn backlog(&self) -> Result<Vec<WorkId>> {
        Ok(self.backlog.clone())
    }
}
