//! Stage processors.
//!
//! A [`StageProcessor`] takes one work-item id to a terminal state for one
//! stage: a written result, a fallback, an error marker, or a logged no-op.
//! Nothing it does propagates an error to the listener.
//!
//! The store is the only coordination point. Duplicate deliveries are
//! absorbed by the "output already set" check up front and by conditional
//! writes at the end, so two processes handling the same id can race
//! without corrupting the row.

pub mod answer;
pub mod speech;

pub use answer::AnswerStage;
pub use speech::SpeechStage;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::capability::CapabilityError;
use crate::error::Result;
use crate::listener::EventHandler;
use crate::model::work::{Stage, WorkId, WorkItem};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{WorkStore, WriteOutcome};
use crate::telemetry::{metrics, work as work_telemetry};

/// Every error marker starts with this.
pub const ERROR_MARKER_PREFIX: &str = "[error]";

/// Upper bound on marker length, in chars.
pub const MAX_MARKER_CHARS: usize = 240;

/// Build the bounded marker written when a stage fails for good.
pub fn error_marker(stage: Stage, err: &CapabilityError) -> String {
    let full = format!(
        "{ERROR_MARKER_PREFIX} {stage} failed ({}): {}",
        err.kind, err.message
    );
    let full = full.replace(['\n', '\r'], " ");
    if full.chars().count() <= MAX_MARKER_CHARS {
        return full;
    }
    let mut cut: String = full.chars().take(MAX_MARKER_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

pub fn is_error_marker(value: &str) -> bool {
    value.starts_with(ERROR_MARKER_PREFIX)
}

/// The stage-specific part of processing.
#[async_trait]
pub trait StageWork: Send + Sync + 'static {
    fn stage(&self) -> Stage;

    /// One capability attempt. Returns the value for the stage's column.
    async fn attempt(
        &self,
        item: &WorkItem,
        input: &str,
    ) -> std::result::Result<String, CapabilityError>;

    /// Column value to record instead of an error marker when the capability
    /// has failed for good. `None` means write the marker.
    async fn fallback(
        &self,
        _item: &WorkItem,
        _input: &str,
        _err: &CapabilityError,
    ) -> Option<String> {
        None
    }

    /// Undo side effects of a value that never made it into the row (the
    /// row was deleted, or another invocation recorded something else).
    async fn discard(&self, _item: &WorkItem, _value: &str) {}
}

/// How one invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No such row when processing started.
    NotFound,
    /// The stage's output was already set.
    AlreadyProcessed,
    /// The prerequisite stage hasn't produced output.
    PrerequisiteMissing,
    /// The capability result was written.
    Completed,
    /// A fallback value was written after a fatal capability error.
    FellBack,
    /// An error marker was written.
    Failed,
    /// Another invocation filled the field first; nothing written.
    Superseded,
    /// The row was deleted while the capability ran.
    Vanished,
    /// The store could not be read or written.
    PersistenceFailed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::NotFound => "not_found",
            Outcome::AlreadyProcessed => "already_processed",
            Outcome::PrerequisiteMissing => "prerequisite_missing",
            Outcome::Completed => "completed",
            Outcome::FellBack => "fell_back",
            Outcome::Failed => "failed",
            Outcome::Superseded => "superseded",
            Outcome::Vanished => "vanished",
            Outcome::PersistenceFailed => "persistence_failed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one stage for one id at a time; cheap to share behind an `Arc`.
pub struct StageProcessor<W> {
    store: Arc<dyn WorkStore>,
    work: W,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<W: StageWork> StageProcessor<W> {
    pub fn new(store: Arc<dyn WorkStore>, work: W) -> Self {
        Self {
            store,
            work,
            policy: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Per-attempt deadline. Expiry counts as a transient failure.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stage(&self) -> Stage {
        self.work.stage()
    }

    /// Process `id` to a terminal outcome.
    pub async fn process(&self, id: WorkId) -> Outcome {
        let stage = self.stage();
        let correlation_id = Uuid::new_v4();
        let span = work_telemetry::start_stage_span(stage, id, &correlation_id);
        let started = Instant::now();

        let outcome = self.run(id).instrument(span.clone()).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        work_telemetry::record_outcome(&span, outcome.as_str(), elapsed_ms);
        metrics::stage_outcomes().add(
            1,
            &[
                KeyValue::new("stage", stage.to_string()),
                KeyValue::new("outcome", outcome.as_str()),
            ],
        );
        metrics::stage_duration_ms().record(
            elapsed_ms as f64,
            &[KeyValue::new("stage", stage.to_string())],
        );
        outcome
    }

    async fn run(&self, id: WorkId) -> Outcome {
        let stage = self.stage();

        let item = match self.store.fetch(id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                info!("work item not found, deleted before processing");
                return Outcome::NotFound;
            }
            Err(e) => {
                error!("cannot fetch work item: {e}");
                return Outcome::PersistenceFailed;
            }
        };

        if item.output(stage).is_some() {
            debug!("stage output already present, skipping");
            return Outcome::AlreadyProcessed;
        }

        if let Some(pre) = stage.prerequisite() {
            if item.output(pre).is_none() {
                warn!(prerequisite = %pre, "prerequisite output missing, skipping");
                return Outcome::PrerequisiteMissing;
            }
        }

        let Some(input) = item.input(stage).map(str::to_owned) else {
            warn!("no input for stage, skipping");
            return Outcome::PrerequisiteMissing;
        };

        let (value, outcome) = match self.call_with_retry(&item, &input).await {
            Ok(output) => {
                let outcome = self.persist_result(id, &output).await;
                (output, outcome)
            }
            Err(err) => match self.work.fallback(&item, &input, &err).await {
                Some(fallback) => {
                    warn!(error = %err, %fallback, "capability unavailable, recording fallback");
                    let outcome = match self.write_if_empty(id, &fallback).await {
                        Outcome::Completed => Outcome::FellBack,
                        other => other,
                    };
                    (fallback, outcome)
                }
                None => {
                    let marker = error_marker(stage, &err);
                    error!(error = %err, "capability failed for good, recording error marker");
                    let outcome = match self.write_if_empty(id, &marker).await {
                        Outcome::Completed => Outcome::Failed,
                        other => other,
                    };
                    return outcome;
                }
            },
        };

        if matches!(outcome, Outcome::Vanished | Outcome::Superseded)
            && !self.is_recorded(id, &value).await
        {
            warn!(%outcome, "result not recorded, discarding it");
            self.work.discard(&item, &value).await;
        }
        outcome
    }

    /// Whether the stage column holds exactly `value`. A failed read counts
    /// as recorded.
    async fn is_recorded(&self, id: WorkId, value: &str) -> bool {
        match self.store.fetch(id).await {
            Ok(Some(item)) => item.output(self.stage()) == Some(value),
            Ok(None) => false,
            Err(e) => {
                warn!("cannot re-read work item, keeping result side effects: {e}");
                true
            }
        }
    }

    async fn call_with_retry(
        &self,
        item: &WorkItem,
        input: &str,
    ) -> std::result::Result<String, CapabilityError> {
        let stage = self.stage().to_string();
        let mut attempt = 1u32;
        loop {
            let call = self.work.attempt(item, input);
            let result = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::timeout(self.timeout)),
            };

            let err = match result {
                Ok(output) => {
                    metrics::capability_attempts().add(
                        1,
                        &[
                            KeyValue::new("stage", stage.clone()),
                            KeyValue::new("result", "ok"),
                        ],
                    );
                    if attempt > 1 {
                        info!(attempt, "capability succeeded after retry");
                    }
                    return Ok(output);
                }
                Err(err) => err,
            };

            metrics::capability_attempts().add(
                1,
                &[
                    KeyValue::new("stage", stage.clone()),
                    KeyValue::new("result", err.kind.to_string()),
                ],
            );

            match self.policy.decide(&err, attempt) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "capability attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => {
                    warn!(attempt, error = %err, "giving up on capability");
                    return Err(err);
                }
            }
        }
    }

    /// Write a real result. A marker left by a concurrent failure is
    /// replaced; a real result from a concurrent success is kept.
    async fn persist_result(&self, id: WorkId, output: &str) -> Outcome {
        let stage = self.stage();
        match self.store.set_output_if_empty(stage, id, output).await {
            Ok(WriteOutcome::Written) => {
                record_write("set_output", "ok");
                info!(output_len = output.len(), "stage output written");
                Outcome::Completed
            }
            Ok(WriteOutcome::NotFound) => {
                info!("work item deleted while processing, result discarded");
                Outcome::Vanished
            }
            Ok(WriteOutcome::AlreadySet) => self.replace_marker(id, output).await,
            Err(e) => {
                record_write("set_output", "error");
                error!(output_len = output.len(), "failed to persist stage output: {e}");
                Outcome::PersistenceFailed
            }
        }
    }

    async fn replace_marker(&self, id: WorkId, output: &str) -> Outcome {
        let stage = self.stage();
        let current = match self.store.fetch(id).await {
            Ok(Some(item)) => item.output(stage).map(str::to_owned),
            Ok(None) => return Outcome::Vanished,
            Err(e) => {
                error!("cannot re-read work item before overwrite: {e}");
                return Outcome::PersistenceFailed;
            }
        };

        if !current.as_deref().is_some_and(is_error_marker) {
            info!("stage output filled concurrently, keeping existing value");
            return Outcome::Superseded;
        }

        match self.store.set_output(stage, id, output).await {
            Ok(WriteOutcome::Written) => {
                record_write("set_output", "ok");
                info!("replaced error marker with result");
                Outcome::Completed
            }
            Ok(_) => Outcome::Vanished,
            Err(e) => {
                record_write("set_output", "error");
                error!("failed to persist stage output: {e}");
                Outcome::PersistenceFailed
            }
        }
    }

    /// Conditional write for markers and fallbacks: never clobbers a value.
    async fn write_if_empty(&self, id: WorkId, value: &str) -> Outcome {
        match self.store.set_output_if_empty(self.stage(), id, value).await {
            Ok(WriteOutcome::Written) => {
                record_write("set_output_if_empty", "ok");
                Outcome::Completed
            }
            Ok(WriteOutcome::AlreadySet) => {
                info!("stage output filled concurrently, not overwriting");
                Outcome::Superseded
            }
            Ok(WriteOutcome::NotFound) => {
                info!("work item deleted while processing");
                Outcome::Vanished
            }
            Err(e) => {
                record_write("set_output_if_empty", "error");
                error!("failed to persist terminal stage value: {e}");
                Outcome::PersistenceFailed
            }
        }
    }
}

fn record_write(operation: &'static str, result: &'static str) {
    metrics::store_writes().add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("result", result),
        ],
    );
}

#[async_trait]
impl<W: StageWork> EventHandler for StageProcessor<W> {
    async fn handle(&self, id: WorkId) -> Result<()> {
        self.process(id).await;
        Ok(())
    }

    async fn backlog(&self) -> Result<Vec<WorkId>> {
        self.store.list_pending(self.stage()).await
    }
}
