//! Speech stage: answer text -> audio artifact reference.
//!
//! When synthesis fails fatally (bad key, no permission, rejected input) the
//! answer text itself is stored as a `.txt` placeholder and its reference is
//! recorded, so the item still completes and the UI can show the text.
//! Audio stored for a row that was deleted meanwhile, or that ended up with
//! another reference, is removed again.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::StageWork;
use crate::artifact::ArtifactStore;
use crate::capability::{CapabilityError, SpeechSynthesizer};
use crate::model::work::{Stage, WorkItem};

pub struct SpeechStage {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl SpeechStage {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            synthesizer,
            artifacts,
        }
    }
}

#[async_trait]
impl StageWork for SpeechStage {
    fn stage(&self) -> Stage {
        Stage::Speech
    }

    async fn attempt(&self, item: &WorkItem, input: &str) -> Result<String, CapabilityError> {
        debug!(model = self.synthesizer.model(), "synthesizing speech");
        let audio = self.synthesizer.synthesize(input).await?;
        self.artifacts
            .put(item.id, self.synthesizer.format(), &audio)
            .await
            // local disk trouble is usually short-lived; let the policy retry it
            .map_err(|e| CapabilityError::transient(format!("cannot store audio: {e}")))
    }

    async fn fallback(
        &self,
        item: &WorkItem,
        input: &str,
        err: &CapabilityError,
    ) -> Option<String> {
        if !err.is_fatal() {
            return None;
        }
        warn!(id = %item.id, "speech unavailable, storing text placeholder");
        match self.artifacts.put(item.id, "txt", input.as_bytes()).await {
            Ok(reference) => Some(reference),
            Err(e) => {
                error!(id = %item.id, "cannot store text placeholder: {e}");
                None
            }
        }
    }

    async fn discard(&self, item: &WorkItem, value: &str) {
        match self.artifacts.remove(value).await {
            Ok(true) => warn!(id = %item.id, reference = %value, "removed unrecorded artifact"),
            Ok(false) => {}
            Err(e) => warn!(id = %item.id, reference = %value, "unrecorded artifact left behind: {e}"),
        }
    }
}
