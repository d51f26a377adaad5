use std::time::Duration;

use anyhow::bail;
use reqwest::StatusCode;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::AppConfig;

/// Total attempts per request, including the first one. Only HTTP 429
/// retries; everything else surfaces immediately.
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("upstream authentication failed: {0}")]
    Unauthorized(String),
    #[error("upstream error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: reqwest::Error,
    },
}

/// Thin client for an OpenRouter-compatible chat-completions endpoint.
/// Holds no per-request state; the shared reqwest client provides whatever
/// connection pooling the transport offers.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    app_url: String,
    app_title: String,
    retry_base_delay: Duration,
}

impl UpstreamClient {
    /// Validates the credential at construction time so a misconfigured
    /// deployment fails before the listener binds, not at first use.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let api_key = config.upstream_api_key.trim();
        if api_key.is_empty() {
            bail!("OPENROUTER_API_KEY is not configured");
        }
        if api_key == "your_api_key_here" || api_key.len() < 10 {
            bail!("OPENROUTER_API_KEY looks like a placeholder; set a real key");
        }

        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            app_url: config.app_url.clone(),
            app_title: config.app_title.clone(),
            retry_base_delay: config.retry_base_delay,
        })
    }

    /// Sends one chat-completion request carrying the instruction text and,
    /// when present, the reference image. Returns the raw response body as
    /// an opaque JSON value; callers own shape interpretation.
    pub async fn send(
        &self,
        instruction: &str,
        reference_image_url: Option<&str>,
        model: &str,
    ) -> Result<Value, UpstreamError> {
        let payload = build_chat_payload(instruction, reference_image_url, model);
        let url = format!("{}/chat/completions", self.base_url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(attempt, model, "sending upstream request");

            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .header("HTTP-Referer", &self.app_url)
                .header("X-Title", &self.app_title)
                .json(&payload)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(response.json().await?);
            }

            let message = response.text().await.unwrap_or_default();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt < MAX_ATTEMPTS {
                    let delay = self.retry_base_delay * 2u32.pow(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "upstream rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(UpstreamError::RateLimited {
                    attempts: MAX_ATTEMPTS,
                });
            }

            if status == StatusCode::UNAUTHORIZED {
                return Err(UpstreamError::Unauthorized(message));
            }

            return Err(UpstreamError::Api {
                status: status.as_u16(),
                message,
            });
        }
    }
}

/// Gemini image models routed through OpenRouter want the content-parts
/// form even for pure text; other models take a plain string.
fn build_chat_payload(instruction: &str, reference_image_url: Option<&str>, model: &str) -> Value {
    let content = match reference_image_url {
        Some(image_url) => json!([
            { "type": "text", "text": instruction },
            { "type": "image_url", "image_url": { "url": image_url } },
        ]),
        None if model.contains("gemini") && model.contains("image") => {
            json!([{ "type": "text", "text": instruction }])
        }
        None => json!(instruction),
    };

    json!({
        "model": model,
        "messages": [{ "role": "user", "content": content }],
        "max_tokens": 1000,
        "temperature": 0.7,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_only_payload_for_gemini_image_models_uses_parts() {
        let payload = build_chat_payload(
            "a red fox",
            None,
            "google/gemini-2.5-flash-image-preview",
        );
        assert_eq!(
            payload["messages"][0]["content"][0]["text"],
            json!("a red fox")
        );
        assert_eq!(payload["max_tokens"], json!(1000));
    }

    #[test]
    fn text_only_payload_for_other_models_is_a_plain_string() {
        let payload = build_chat_payload("a red fox", None, "some/other-model");
        assert_eq!(payload["messages"][0]["content"], json!("a red fox"));
    }

    #[test]
    fn reference_image_is_embedded_alongside_the_text() {
        let payload = build_chat_payload(
            "make it night",
            Some("https://example.com/ref.png"),
            "google/gemini-2.5-flash-image-preview",
        );
        let content = &payload["messages"][0]["content"];
        assert_eq!(content[0]["type"], json!("text"));
        assert_eq!(content[1]["type"], json!("image_url"));
        assert_eq!(
            content[1]["image_url"]["url"],
            json!("https://example.com/ref.png")
        );
    }

    #[test]
    fn placeholder_credentials_are_rejected_at_construction() {
        let mut config = AppConfig::for_tests("http://localhost:1");
        config.upstream_api_key = "your_api_key_here".to_string();
        assert!(UpstreamClient::new(&config).is_err());

        config.upstream_api_key = String::new();
        assert!(UpstreamClient::new(&config).is_err());

        config.upstream_api_key = "short".to_string();
        assert!(UpstreamClient::new(&config).is_err());

        config.upstream_api_key = "sk-or-test-0123456789".to_string();
        assert!(UpstreamClient::new(&config).is_ok());
    }
}
