//! Work item and stage types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A captured question and whatever the stages have produced for it so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Store-assigned identifier. Never reused, even after deletion.
    pub id: WorkId,

    /// The question text. Immutable after insert.
    pub question: String,

    /// Answer stage output. Null until the answer stage finishes.
    pub answer: Option<String>,

    /// Speech stage output: an artifact reference, a fallback artifact
    /// reference, or an error marker.
    pub audio: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// The output field owned by `stage`.
    pub fn output(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Answer => self.answer.as_deref(),
            Stage::Speech => self.audio.as_deref(),
        }
    }

    /// The text the stage's capability consumes.
    pub fn input(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Answer => Some(&self.question),
            Stage::Speech => self.answer.as_deref(),
        }
    }
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(pub i64);

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkId {
    type Err = std::num::ParseIntError;

    /// Parses a notification payload. Surrounding whitespace is tolerated.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(WorkId)
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Channel notified when a question is inserted.
pub const QUESTION_PENDING: &str = "question_pending";

/// Channel notified when an answer first becomes non-null.
pub const ANSWER_READY: &str = "answer_ready";

/// A pipeline phase. Each stage owns exactly one output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Question -> answer text.
    Answer,
    /// Answer text -> audio artifact.
    Speech,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Answer, Stage::Speech];

    /// Channel whose events mean this stage has work.
    pub fn channel(self) -> &'static str {
        match self {
            Stage::Answer => QUESTION_PENDING,
            Stage::Speech => ANSWER_READY,
        }
    }

    /// Column this stage writes.
    pub fn column(self) -> &'static str {
        match self {
            Stage::Answer => "answer",
            Stage::Speech => "audio",
        }
    }

    /// Stage whose output must exist before this one may run.
    pub fn prerequisite(self) -> Option<Stage> {
        match self {
            Stage::Answer => None,
            Stage::Speech => Some(Stage::Answer),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Answer => "answer",
            Stage::Speech => "speech",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Stage {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "answer" => Ok(Stage::Answer),
            "speech" => Ok(Stage::Speech),
            other => Err(crate::error::Error::Other(format!("unknown stage: {other}"))),
        }
    }
}
