//! Answer generation via rig-core's Anthropic provider.
//!
//! Rig surfaces API failures as `CompletionError::ProviderError` carrying the
//! provider's error body. Anthropic tags every error body with a type
//! (`rate_limit_error`, `permission_error`, ...), which is what we classify on.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::{CompletionError, Prompt, PromptError};
use secrecy::{ExposeSecret, SecretString};

use super::{CapabilityError, ErrorKind, TextGenerator};
use crate::telemetry::genai;
use tracing::Instrument;

/// Default system prompt: short spoken-style answers, since they get read aloud.
pub const DEFAULT_PREAMBLE: &str = "Answer the user's question accurately and concisely. \
Your answer will be read aloud, so use plain sentences without markdown, lists or code blocks.";

/// Create an Anthropic client from a secret API key.
///
/// # Errors
/// Returns an error if the underlying HTTP client cannot be constructed.
pub fn anthropic_client(
    api_key: &SecretString,
) -> Result<rig::providers::anthropic::Client, rig::http_client::Error> {
    rig::providers::anthropic::Client::new(api_key.expose_secret())
}

/// [`TextGenerator`] backed by an Anthropic model.
pub struct AnthropicGenerator {
    client: rig::providers::anthropic::Client,
    model: String,
    preamble: String,
    max_tokens: u64,
}

impl AnthropicGenerator {
    pub fn new(client: rig::providers::anthropic::Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            preamble: DEFAULT_PREAMBLE.to_string(),
            max_tokens: 1024,
        }
    }

    pub fn preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        let span = genai::start_chat_span(&self.model, "anthropic");
        let agent = self
            .client
            .agent(&self.model)
            .preamble(&self.preamble)
            .max_tokens(self.max_tokens)
            .build();

        let answer = async { agent.prompt(prompt).await }
            .instrument(span)
            .await
            .map_err(translate)?;

        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(CapabilityError::transient("model returned an empty answer"));
        }
        Ok(answer)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn translate(err: PromptError) -> CapabilityError {
    match err {
        PromptError::CompletionError(CompletionError::ProviderError(body)) => {
            CapabilityError::new(classify_provider_body(&body), body)
        }
        // transport, response decoding and the like
        PromptError::CompletionError(other) => CapabilityError::transient(other.to_string()),
        other => CapabilityError::fatal(other.to_string()),
    }
}

/// Classify an Anthropic error body by its error type tag.
pub fn classify_provider_body(body: &str) -> ErrorKind {
    const TRANSIENT: [&str; 4] = [
        "rate_limit_error",
        "overloaded_error",
        "api_error",
        "timeout_error",
    ];
    if TRANSIENT.iter().any(|tag| body.contains(tag)) {
        ErrorKind::Transient
    } else {
        ErrorKind::Fatal
    }
}
