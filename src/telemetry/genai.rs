//! GenAI semantic convention span helpers for capability calls.
//!
//! Uses OpenTelemetry GenAI semantic conventions:
//! - `gen_ai.operation.name`
//! - `gen_ai.request.model`
//! - `gen_ai.provider.name`

use tracing::Span;

/// Start a span for a chat/completion operation.
pub fn start_chat_span(model: &str, provider: &str) -> Span {
    tracing::info_span!(
        "gen_ai.chat",
        "gen_ai.operation.name" = "chat",
        "gen_ai.request.model" = model,
        "gen_ai.provider.name" = provider,
    )
}

/// Start a span for a text-to-speech call.
pub fn start_speech_span(model: &str, voice: &str, input_bytes: usize) -> Span {
    tracing::info_span!(
        "gen_ai.speech",
        "gen_ai.operation.name" = "text_to_speech",
        "gen_ai.request.model" = model,
        "speech.voice" = voice,
        "speech.input_bytes" = input_bytes,
    )
}
