//! The work store contract.
//!
//! Postgres implements it in [`crate::db::work`]; [`MemoryStore`] implements
//! the same event semantics in process so stages and listeners can be
//! exercised without a database.
//!
//! Event rules every implementation must keep:
//! - insert emits `question_pending` with the new id;
//! - an `answer` write emits `answer_ready` only on the NULL -> non-NULL edge;
//! - the event is never visible without its mutation, nor the reverse.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::artifact::ArtifactStore;
use crate::error::Result;
use crate::model::work::{Stage, WorkId, WorkItem};

/// Result of a stage-output write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Conditional write skipped: the field already holds a value.
    AlreadySet,
    /// No row with that id (deleted, or never existed).
    NotFound,
}

#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Create an item with only the question set. Emits `question_pending`.
    async fn insert(&self, question: &str) -> Result<WorkId>;

    async fn fetch(&self, id: WorkId) -> Result<Option<WorkItem>>;

    /// Set a stage's output unconditionally.
    async fn set_output(&self, stage: Stage, id: WorkId, text: &str) -> Result<WriteOutcome>;

    /// Set a stage's output only while it is still NULL.
    async fn set_output_if_empty(
        &self,
        stage: Stage,
        id: WorkId,
        text: &str,
    ) -> Result<WriteOutcome>;

    /// Remove the row. `Ok(None)` when absent, otherwise the prior `audio` value.
    async fn delete(&self, id: WorkId) -> Result<Option<Option<String>>>;

    /// All ids, newest first.
    async fn list_ids(&self) -> Result<Vec<WorkId>>;

    /// Ids whose `stage` output is NULL and whose prerequisite is met, oldest first.
    async fn list_pending(&self, stage: Stage) -> Result<Vec<WorkId>>;
}

/// Delete an item and its audio artifact.
///
/// Returns `false` if the item did not exist. A missing or undeletable
/// artifact is logged and otherwise ignored.
pub async fn delete_item(
    store: &dyn WorkStore,
    artifacts: &dyn ArtifactStore,
    id: WorkId,
) -> Result<bool> {
    let Some(audio) = store.delete(id).await? else {
        return Ok(false);
    };

    if let Some(reference) = audio {
        match artifacts.remove(&reference).await {
            Ok(true) => info!(%id, %reference, "artifact removed"),
            Ok(false) => {
                if artifacts.owns(&reference) {
                    warn!(%id, %reference, "row deleted but artifact was already gone");
                }
            }
            Err(e) => warn!(%id, %reference, "row deleted but artifact removal failed: {e}"),
        }
    }
    info!(%id, "work item deleted");
    Ok(true)
}
