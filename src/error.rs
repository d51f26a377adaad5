use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Closed error taxonomy exposed on the wire. Every failure leaving the
/// service maps to exactly one of these.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("{0}")]
    FileTooLarge(String),
    #[error("{0}")]
    InvalidFileType(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Server(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidInput(_) => "INVALID_INPUT",
            ServiceError::Unauthorized(_) => "UNAUTHORIZED",
            ServiceError::RateLimited(_) => "RATE_LIMITED",
            ServiceError::FileTooLarge(_) => "FILE_TOO_LARGE",
            ServiceError::InvalidFileType(_) => "INVALID_FILE_TYPE",
            ServiceError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ServiceError::Server(_) => "SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidInput(_)
            | ServiceError::FileTooLarge(_)
            | ServiceError::InvalidFileType(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            },
        });

        (self.status(), axum::Json(body)).into_response()
    }
}

/// Maps an unstructured upstream diagnostic message onto the taxonomy by
/// keyword matching. The upstream does not return structured error codes,
/// so this is best-effort; keep the keyword list here so it can be tested
/// and evolved in one place.
pub fn classify_upstream_message(message: &str) -> ServiceError {
    let lower = message.to_lowercase();

    if lower.contains("rate limit") || lower.contains("429") {
        return ServiceError::RateLimited(
            "Too many requests, please retry in a minute or two".to_string(),
        );
    }
    if lower.contains("unauthorized") || lower.contains("api key") {
        return ServiceError::Unauthorized(
            "Upstream API key is invalid or missing; check OPENROUTER_API_KEY".to_string(),
        );
    }
    if lower.contains("credits") || lower.contains("quota") {
        return ServiceError::RateLimited(
            "Upstream quota exhausted; check the account balance or wait for the quota to reset"
                .to_string(),
        );
    }
    if lower.contains("network") || lower.contains("timeout") {
        return ServiceError::ServiceUnavailable(
            "Network problem reaching the upstream model; please retry".to_string(),
        );
    }

    ServiceError::Server(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_keywords_map_to_rate_limited() {
        assert!(matches!(
            classify_upstream_message("rate limit exceeded"),
            ServiceError::RateLimited(_)
        ));
        assert!(matches!(
            classify_upstream_message("got HTTP 429 from upstream"),
            ServiceError::RateLimited(_)
        ));
    }

    #[test]
    fn auth_keywords_map_to_unauthorized() {
        assert!(matches!(
            classify_upstream_message("request was unauthorized"),
            ServiceError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_upstream_message("invalid API key supplied"),
            ServiceError::Unauthorized(_)
        ));
    }

    #[test]
    fn quota_keywords_map_to_rate_limited() {
        assert!(matches!(
            classify_upstream_message("insufficient credits"),
            ServiceError::RateLimited(_)
        ));
        assert!(matches!(
            classify_upstream_message("monthly quota reached"),
            ServiceError::RateLimited(_)
        ));
    }

    #[test]
    fn network_keywords_map_to_service_unavailable() {
        assert!(matches!(
            classify_upstream_message("network unreachable"),
            ServiceError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            classify_upstream_message("connect timeout"),
            ServiceError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn unrecognized_messages_fall_through_to_server_error() {
        let err = classify_upstream_message("something odd happened");
        assert!(matches!(err, ServiceError::Server(_)));
        assert_eq!(err.to_string(), "something odd happened");
    }

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            ServiceError::InvalidInput("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::FileTooLarge("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::RateLimited("x".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ServiceError::ServiceUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
