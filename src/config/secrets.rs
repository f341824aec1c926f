//! Secret handling utilities.
//!
//! Re-exports secrecy types and provides helpers for working with
//! secrets in the clipboard-tts context.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Render a connection URL with its password masked, for log lines.
pub fn redact_url(url: &SecretString) -> String {
    match reqwest::Url::parse(url.expose_secret()) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable url>".to_string(),
    }
}
