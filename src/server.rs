use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    extract::rejection::JsonRejection,
    http::{HeaderMap, Method, header},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::ServiceError,
    service::{GenerationRequest, GenerationResult, ImageService, ImageSource, TransformRequest},
};

const ALLOWED_IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];
const API_VERSION: &str = "1.0.0";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: Arc<ImageService>,
}

pub fn build_router(config: Arc<AppConfig>, service: Arc<ImageService>) -> Router {
    // Browser callers hit these endpoints cross-origin; pre-flights are
    // answered permissively.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    // Twice the file cap so oversized uploads reach our typed check
    // instead of a bare body-limit rejection.
    let body_limit = DefaultBodyLimit::max(config.max_image_size * 2);

    let state = AppState { config, service };

    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/transform", post(transform))
        .with_state(state)
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<Value>, ServiceError> {
    authorize(&state, &headers)?;

    let Json(mut request) =
        payload.map_err(|rejection| ServiceError::InvalidInput(rejection.body_text()))?;

    // Defaults the wire contract promises.
    request.width.get_or_insert(1024);
    request.height.get_or_insert(1024);
    request.num_images.get_or_insert(1);
    request.steps.get_or_insert(30);
    request.guidance.get_or_insert(7.5);

    let result = state.service.generate(request).await?;
    Ok(Json(success_envelope(result)))
}

async fn transform(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, axum::extract::multipart::MultipartRejection>,
) -> Result<Json<Value>, ServiceError> {
    authorize(&state, &headers)?;

    let mut multipart =
        multipart.map_err(|rejection| ServiceError::InvalidInput(rejection.body_text()))?;

    let mut image_file: Option<(Vec<u8>, String)> = None;
    let mut image_url: Option<String> = None;
    let mut prompt: Option<String> = None;
    let mut negative_prompt: Option<String> = None;
    let mut strength: Option<f64> = None;
    let mut guidance: Option<f64> = None;
    let mut preserve_aspect_ratio = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::InvalidInput(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::InvalidInput(format!("invalid image field: {e}")))?;
                image_file = Some((bytes.to_vec(), content_type));
            }
            "imageUrl" => image_url = Some(read_text(field).await?),
            "prompt" => prompt = Some(read_text(field).await?),
            "negativePrompt" => negative_prompt = Some(read_text(field).await?),
            "strength" => strength = Some(parse_number(&name, read_text(field).await?)?),
            "guidance" => guidance = Some(parse_number(&name, read_text(field).await?)?),
            "preserveAspectRatio" => preserve_aspect_ratio = read_text(field).await? == "true",
            _ => {}
        }
    }

    let prompt = prompt
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ServiceError::InvalidInput("Prompt is required".into()))?;

    let image = match (image_file, image_url) {
        (Some(_), Some(_)) => {
            return Err(ServiceError::InvalidInput(
                "Provide either an image file or an image URL, not both".into(),
            ));
        }
        (None, None) => {
            return Err(ServiceError::InvalidInput(
                "Either image file or image URL is required".into(),
            ));
        }
        (Some((bytes, content_type)), None) => {
            validate_upload(&state.config, &bytes, &content_type)?;
            ImageSource::Upload {
                bytes,
                content_type,
            }
        }
        (None, Some(url)) => ImageSource::Url(url),
    };

    let request = TransformRequest {
        image,
        prompt,
        negative_prompt: negative_prompt.filter(|n| !n.is_empty()),
        strength,
        guidance,
        preserve_aspect_ratio,
    };

    let result = state.service.transform(request).await?;
    Ok(Json(success_envelope(result)))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ServiceError> {
    let Some(expected) = state.config.auth_token.as_deref() else {
        // No token configured: local-dev mode, endpoints are open.
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided == Some(expected) {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized("Authentication required".into()))
    }
}

/// File checks run before any network call.
fn validate_upload(config: &AppConfig, bytes: &[u8], content_type: &str) -> Result<(), ServiceError> {
    if bytes.len() > config.max_image_size {
        return Err(ServiceError::FileTooLarge(format!(
            "Image file is too large. Maximum size is {}MB",
            config.max_image_size / 1024 / 1024
        )));
    }
    if !ALLOWED_IMAGE_TYPES.contains(&content_type) {
        return Err(ServiceError::InvalidFileType(
            "Invalid file type. Only JPEG, PNG, and WebP images are allowed".into(),
        ));
    }
    Ok(())
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ServiceError> {
    field
        .text()
        .await
        .map_err(|e| ServiceError::InvalidInput(format!("invalid multipart field: {e}")))
}

fn parse_number(name: &str, raw: String) -> Result<f64, ServiceError> {
    raw.parse()
        .map_err(|_| ServiceError::InvalidInput(format!("Field '{name}' must be a number")))
}

fn success_envelope(result: GenerationResult) -> Value {
    serde_json::json!({
        "success": true,
        "data": result,
        "meta": {
            "timestamp": Utc::now().timestamp_millis(),
            "requestId": format!("req_{}", Uuid::new_v4().simple()),
            "version": API_VERSION,
        },
    })
}
