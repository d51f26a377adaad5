use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::{ServiceError, classify_upstream_message},
    normalizer::{ImageLocator, extract_image},
    upstream::{UpstreamClient, UpstreamError},
};

const MAX_PROMPT_CHARS: usize = 1000;
const MIN_DIMENSION: u32 = 256;
const MAX_DIMENSION: u32 = 2048;
const DEFAULT_DIMENSION: u32 = 1024;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_images: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

/// Reference image for the transform path: either an uploaded file or a
/// caller-supplied URL. Uploads are embedded as base64 data URLs before the
/// upstream call.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Upload { bytes: Vec<u8>, content_type: String },
    Url(String),
}

#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub image: ImageSource,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub strength: Option<f64>,
    pub guidance: Option<f64>,
    pub preserve_aspect_ratio: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub id: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub format: &'static str,
    /// Upstream never reports a byte size.
    pub size: u64,
    pub metadata: ImageMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub prompt: String,
    pub model: String,
    pub parameters: Value,
    pub generation_time: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub generation_time: u64,
    pub model: String,
    pub parameters: Value,
    /// True when no image could be located in the upstream response and a
    /// seeded placeholder was returned instead. The request still succeeds;
    /// callers that care can detect the substitution here.
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub images: Vec<GeneratedImage>,
    pub metadata: ResultMetadata,
}

/// Orchestrates one generation or transformation: validate, build the
/// instruction, call upstream, normalize, package. Stateless across calls.
pub struct ImageService {
    client: UpstreamClient,
    model: String,
}

impl ImageService {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: UpstreamClient::new(config)?,
            model: config.image_model.clone(),
        })
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, ServiceError> {
        let started = Instant::now();
        validate_generation(&request)?;

        let instruction = build_generation_prompt(&request);
        tracing::debug!(model = %self.model, %instruction, "generating from text");

        let outcome = self.client.send(&instruction, None, &self.model).await;

        let width = request.width.unwrap_or(DEFAULT_DIMENSION);
        let height = request.height.unwrap_or(DEFAULT_DIMENSION);
        let parameters =
            serde_json::to_value(&request).map_err(|e| ServiceError::Server(e.to_string()))?;

        self.package(outcome, &request.prompt, width, height, parameters, started)
    }

    pub async fn transform(
        &self,
        request: TransformRequest,
    ) -> Result<GenerationResult, ServiceError> {
        let started = Instant::now();
        validate_prompt(&request.prompt)?;

        let reference_url = match &request.image {
            ImageSource::Upload {
                bytes,
                content_type,
            } => format!("data:{content_type};base64,{}", BASE64.encode(bytes)),
            ImageSource::Url(url) => url.clone(),
        };

        let instruction = build_transformation_prompt(&request);
        tracing::debug!(model = %self.model, %instruction, "transforming reference image");

        let outcome = self
            .client
            .send(&instruction, Some(&reference_url), &self.model)
            .await;

        let parameters = transform_parameters(&request);
        self.package(
            outcome,
            &request.prompt,
            DEFAULT_DIMENSION,
            DEFAULT_DIMENSION,
            parameters,
            started,
        )
    }

    /// Common tail of both paths: classify upstream failures, normalize the
    /// response, fall back to a seeded placeholder when nothing usable is
    /// found, and wrap everything in the same result shape.
    fn package(
        &self,
        outcome: Result<Value, UpstreamError>,
        prompt: &str,
        width: u32,
        height: u32,
        parameters: Value,
        started: Instant,
    ) -> Result<GenerationResult, ServiceError> {
        let raw = outcome.map_err(classify_upstream_failure)?;

        let (url, degraded) = match extract_image(&raw) {
            Some(locator) => {
                match &locator {
                    ImageLocator::Remote(url) => {
                        tracing::debug!(%url, "extracted remote image url")
                    }
                    ImageLocator::Inline(url) => {
                        tracing::debug!(len = url.len(), "extracted inline image data")
                    }
                }
                (locator.into_url(), false)
            }
            None => {
                tracing::warn!("no image found in upstream response, emitting placeholder");
                (placeholder_url(Some(prompt), width, height), true)
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let image = GeneratedImage {
            id: format!("img_{}", Uuid::new_v4().simple()),
            url,
            width,
            height,
            format: "png",
            size: 0,
            metadata: ImageMetadata {
                prompt: prompt.to_string(),
                model: self.model.clone(),
                parameters: parameters.clone(),
                generation_time: elapsed_ms,
            },
            created_at: Utc::now(),
        };

        Ok(GenerationResult {
            images: vec![image],
            metadata: ResultMetadata {
                generation_time: elapsed_ms,
                model: self.model.clone(),
                parameters,
                degraded,
            },
        })
    }
}

fn validate_prompt(prompt: &str) -> Result<(), ServiceError> {
    if prompt.trim().is_empty() {
        return Err(ServiceError::InvalidInput("Prompt is required".into()));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(ServiceError::InvalidInput(format!(
            "Prompt is too long (max {MAX_PROMPT_CHARS} characters)"
        )));
    }
    Ok(())
}

fn validate_generation(request: &GenerationRequest) -> Result<(), ServiceError> {
    validate_prompt(&request.prompt)?;

    if let Some(width) = request.width {
        if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&width) {
            return Err(ServiceError::InvalidInput(format!(
                "Width must be between {MIN_DIMENSION} and {MAX_DIMENSION}"
            )));
        }
    }
    if let Some(height) = request.height {
        if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&height) {
            return Err(ServiceError::InvalidInput(format!(
                "Height must be between {MIN_DIMENSION} and {MAX_DIMENSION}"
            )));
        }
    }
    Ok(())
}

fn build_generation_prompt(request: &GenerationRequest) -> String {
    let mut prompt = request.prompt.clone();

    if let (Some(width), Some(height)) = (request.width, request.height) {
        prompt.push_str(&format!(" ({width}x{height} resolution)"));
    }
    if let Some(negative) = request.negative_prompt.as_deref().filter(|n| !n.is_empty()) {
        prompt.push_str(&format!(". Avoid: {negative}"));
    }

    prompt
}

fn build_transformation_prompt(request: &TransformRequest) -> String {
    let mut prompt = format!("Transform this image: {}", request.prompt);

    if let Some(strength) = request.strength {
        prompt.push_str(&format!(" ({} changes)", strength_descriptor(strength)));
    }
    if let Some(negative) = request.negative_prompt.as_deref().filter(|n| !n.is_empty()) {
        prompt.push_str(&format!(". Avoid: {negative}"));
    }

    prompt
}

fn strength_descriptor(strength: f64) -> &'static str {
    if strength < 0.3 {
        "subtle"
    } else if strength < 0.7 {
        "moderate"
    } else {
        "significant"
    }
}

/// Echo of the transform parameters for the result metadata. The reference
/// image itself is summarized, not replayed.
fn transform_parameters(request: &TransformRequest) -> Value {
    serde_json::json!({
        "image": match &request.image {
            ImageSource::Upload { bytes, content_type } => {
                serde_json::json!({ "kind": "upload", "contentType": content_type, "bytes": bytes.len() })
            }
            ImageSource::Url(url) => serde_json::json!({ "kind": "url", "url": url }),
        },
        "prompt": request.prompt,
        "negativePrompt": request.negative_prompt,
        "strength": request.strength,
        "guidance": request.guidance,
        "preserveAspectRatio": request.preserve_aspect_ratio,
    })
}

/// Deterministic filler image keyed by the prompt text, so the same prompt
/// always degrades to the same URL. A timestamp seed is only used when
/// there is no prompt to hash.
fn placeholder_url(prompt: Option<&str>, width: u32, height: u32) -> String {
    let seed = match prompt.filter(|p| !p.is_empty()) {
        Some(p) => p.chars().fold(0u32, |acc, c| acc.wrapping_add(c as u32)),
        None => Utc::now().timestamp_subsec_nanos(),
    };
    format!("https://picsum.photos/seed/{seed}/{width}/{height}")
}

/// Structured upstream failures short-circuit to their obvious kinds; the
/// rest go through the keyword classifier, since the upstream only gives
/// us message text.
fn classify_upstream_failure(error: UpstreamError) -> ServiceError {
    match error {
        UpstreamError::RateLimited { .. } => ServiceError::RateLimited(
            "Too many requests, please retry in a minute or two".to_string(),
        ),
        UpstreamError::Unauthorized(_) => ServiceError::Unauthorized(
            "Upstream API key is invalid or missing; check OPENROUTER_API_KEY".to_string(),
        ),
        UpstreamError::Transport { source } if source.is_timeout() || source.is_connect() => {
            ServiceError::ServiceUnavailable(
                "Network problem reaching the upstream model; please retry".to_string(),
            )
        }
        UpstreamError::Api { ref message, .. } => classify_upstream_message(message),
        other => classify_upstream_message(&other.to_string()),
    }
}
