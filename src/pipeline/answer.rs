//! Answer stage: question -> answer text.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::StageWork;
use crate::capability::{CapabilityError, TextGenerator};
use crate::model::work::{Stage, WorkItem};

pub struct AnswerStage {
    generator: Arc<dyn TextGenerator>,
}

impl AnswerStage {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageWork for AnswerStage {
    fn stage(&self) -> Stage {
        Stage::Answer
    }

    async fn attempt(&self, _item: &WorkItem, input: &str) -> Result<String, CapabilityError> {
        debug!(model = self.generator.model(), "generating answer");
        self.generator.generate(input).await
    }
}
