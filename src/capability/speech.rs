//! Speech synthesis over an OpenAI-compatible `/v1/audio/speech` endpoint.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::Instrument;

use super::{CapabilityError, SpeechSynthesizer, classify_reqwest};
use crate::telemetry::genai;

pub const DEFAULT_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Longest input the endpoint accepts; longer answers are cut at a char boundary.
const MAX_INPUT_CHARS: usize = 4096;

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// [`SpeechSynthesizer`] that POSTs text and receives MP3 bytes.
pub struct HttpSpeechClient {
    http: reqwest::Client,
    url: String,
    api_key: SecretString,
    model: String,
    voice: String,
}

impl HttpSpeechClient {
    /// Build a client. `timeout` bounds the whole request, body included.
    pub fn new(
        url: impl Into<String>,
        api_key: &SecretString,
        model: impl Into<String>,
        voice: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CapabilityError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CapabilityError::fatal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
            api_key: SecretString::from(api_key.expose_secret().to_owned()),
            model: model.into(),
            voice: voice.into(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CapabilityError> {
        let input = truncate_chars(text, MAX_INPUT_CHARS);
        let span = genai::start_speech_span(&self.model, &self.voice, input.len());

        async {
            let resp = self
                .http
                .post(&self.url)
                .bearer_auth(self.api_key.expose_secret())
                .json(&SpeechRequest {
                    model: &self.model,
                    input,
                    voice: &self.voice,
                    response_format: "mp3",
                })
                .send()
                .await
                .map_err(|e| classify_reqwest(&e))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(CapabilityError::from_status(
                    status.as_u16(),
                    truncate_chars(&body, 300),
                ));
            }

            let bytes = resp.bytes().await.map_err(|e| classify_reqwest(&e))?;
            if bytes.is_empty() {
                return Err(CapabilityError::transient("speech endpoint returned no audio"));
            }
            Ok(bytes.to_vec())
        }
        .instrument(span)
        .await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
