//! External capabilities the stages depend on.
//!
//! Both capabilities are black boxes behind a trait. Vendor clients translate
//! their own failures into [`CapabilityError`] once, at this edge, so the
//! pipeline only ever sees `Transient` or `Fatal`.

pub mod anthropic;
pub mod speech;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// How a capability failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network trouble, timeouts, rate limits, 5xx. Worth retrying.
    Transient,
    /// Auth, permission or malformed-request failures. Retrying won't help.
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} capability error: {message}")]
pub struct CapabilityError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CapabilityError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// A call that exceeded its deadline.
    pub fn timeout(after: Duration) -> Self {
        Self::transient(format!("timed out after {}ms", after.as_millis()))
    }

    /// Map an HTTP status to the taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        Self::new(classify_status(status), format!("HTTP {status}: {body}"))
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Fatal
    }
}

/// 408, 425, 429 and every 5xx are transient; any other failure status is fatal.
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        408 | 425 | 429 | 500..=599 => ErrorKind::Transient,
        _ => ErrorKind::Fatal,
    }
}

/// Translate a reqwest transport error.
pub fn classify_reqwest(err: &reqwest::Error) -> CapabilityError {
    if let Some(status) = err.status() {
        return CapabilityError::from_status(status.as_u16(), &err.to_string());
    }
    if err.is_builder() {
        return CapabilityError::fatal(err.to_string());
    }
    // connect, timeout, request, body and decode failures are all network-side
    CapabilityError::transient(err.to_string())
}

/// `GenerateText(prompt) -> text`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError>;

    /// Model identifier, for span attributes.
    fn model(&self) -> &str {
        "unknown"
    }
}

/// `SynthesizeSpeech(text) -> audio bytes`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CapabilityError>;

    /// File extension for the produced audio.
    fn format(&self) -> &str {
        "mp3"
    }

    fn model(&self) -> &str {
        "unknown"
    }
}
