//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::capability::anthropic::DEFAULT_PREAMBLE;
use crate::capability::speech::DEFAULT_SPEECH_URL;
use crate::error::{Error, Result};
use crate::retry::{Backoff, RetryPolicy};
use secrecy::SecretString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    /// Connection URLs, tried in order on every connect.
    pub database_urls: Vec<SecretString>,
    pub anthropic_api_key: Option<SecretString>,
    pub answer_model: String,
    pub answer_preamble: String,
    pub speech: SpeechConfig,
    pub artifact_dir: PathBuf,
    pub artifact_url_prefix: String,
    pub retry: RetryPolicy,
    pub capability_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub shutdown_grace: Duration,
    pub health_addr: Option<String>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

#[derive(Debug)]
pub struct SpeechConfig {
    pub url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub voice: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, the container or systemd unit provides the vars.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_urls: database_urls(&var)?,
            anthropic_api_key: var("ANTHROPIC_API_KEY").map(SecretString::from),
            answer_model: var("ANSWER_MODEL")
                .unwrap_or_else(|| "claude-sonnet-4-20250514".to_string()),
            answer_preamble: var("ANSWER_PREAMBLE")
                .unwrap_or_else(|| DEFAULT_PREAMBLE.to_string()),
            speech: SpeechConfig {
                url: var("SPEECH_API_URL").unwrap_or_else(|| DEFAULT_SPEECH_URL.to_string()),
                api_key: var("SPEECH_API_KEY").map(SecretString::from),
                model: var("SPEECH_MODEL").unwrap_or_else(|| "tts-1".to_string()),
                voice: var("SPEECH_VOICE").unwrap_or_else(|| "alloy".to_string()),
            },
            artifact_dir: var("ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("artifacts")),
            artifact_url_prefix: var("ARTIFACT_URL_PREFIX")
                .unwrap_or_else(|| "/artifacts".to_string()),
            retry: RetryPolicy {
                max_attempts: parsed(&var, "RETRY_MAX_ATTEMPTS", 5)?.max(1),
                base_delay: millis(&var, "RETRY_BASE_DELAY_MS", 1_000)?,
                max_delay: millis(&var, "RETRY_MAX_DELAY_MS", 30_000)?,
            },
            capability_timeout: Duration::from_secs(
                parsed(&var, "CAPABILITY_TIMEOUT_SECS", 60)?,
            ),
            reconnect_base_delay: millis(&var, "RECONNECT_BASE_DELAY_MS", 1_000)?,
            reconnect_max_delay: millis(&var, "RECONNECT_MAX_DELAY_MS", 30_000)?,
            shutdown_grace: Duration::from_secs(parsed(&var, "SHUTDOWN_GRACE_SECS", 10)?),
            health_addr: var("HEALTH_ADDR"),
            otel_endpoint: var("OTEL_ENDPOINT"),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Backoff for the reconnect loop, starting fresh.
    pub fn reconnect_backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_base_delay, self.reconnect_max_delay)
    }

    pub fn require_anthropic_key(&self) -> Result<&SecretString> {
        self.anthropic_api_key
            .as_ref()
            .ok_or_else(|| missing("ANTHROPIC_API_KEY"))
    }

    pub fn require_speech_key(&self) -> Result<&SecretString> {
        self.speech
            .api_key
            .as_ref()
            .ok_or_else(|| missing("SPEECH_API_KEY"))
    }
}

fn missing(name: &str) -> Error {
    Error::Config(format!("required environment variable {name} is not set"))
}

/// `DATABASE_URL` (+ optional `DATABASE_FALLBACK_URL`), or URLs built from
/// `DB_*` parts with `LAN_IP` first and `DB_DOMAIN` as fallback.
fn database_urls(var: &impl Fn(&str) -> Option<String>) -> Result<Vec<SecretString>> {
    if let Some(url) = var("DATABASE_URL") {
        let mut urls = vec![SecretString::from(url)];
        if let Some(fallback) = var("DATABASE_FALLBACK_URL") {
            urls.push(SecretString::from(fallback));
        }
        return Ok(urls);
    }

    let hosts: Vec<String> = ["LAN_IP", "DB_DOMAIN"].iter().filter_map(|n| var(*n)).collect();
    if hosts.is_empty() {
        return Err(missing("DATABASE_URL"));
    }

    let user = var("DB_USER").unwrap_or_else(|| "postgres".to_string());
    let password = var("DB_PASSWORD").ok_or_else(|| missing("DB_PASSWORD"))?;
    let name = var("DB_NAME").unwrap_or_else(|| "clipboard_tts".to_string());
    let port: u16 = parsed(var, "DB_PORT", 5432)?;

    hosts
        .iter()
        .map(|host| build_url(host, port, &user, &password, &name).map(SecretString::from))
        .collect()
}

fn build_url(host: &str, port: u16, user: &str, password: &str, name: &str) -> Result<String> {
    let bad = |what: &str| Error::Config(format!("invalid database {what} for host {host}"));
    let mut url = reqwest::Url::parse("postgres://localhost").map_err(|_| bad("url"))?;
    url.set_host(Some(host)).map_err(|_| bad("host"))?;
    url.set_port(Some(port)).map_err(|_| bad("port"))?;
    url.set_username(user).map_err(|_| bad("user"))?;
    url.set_password(Some(password)).map_err(|_| bad("password"))?;
    url.set_path(&format!("/{name}"));
    Ok(url.to_string())
}

fn parsed<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}

fn millis(var: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> Result<Duration> {
    parsed(var, name, default).map(Duration::from_millis)
}
