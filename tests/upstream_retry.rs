mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use image_proxy_service::upstream::{UpstreamClient, UpstreamError};
use support::test_config;

/// Replays a fixed sequence of responses, repeating the last one, and
/// counts how many requests arrived.
#[derive(Clone)]
struct SequenceResponder {
    calls: Arc<AtomicUsize>,
    responses: Vec<ResponseTemplate>,
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses[idx.min(self.responses.len() - 1)].clone()
    }
}

async fn mock_completions(server: &MockServer, responses: Vec<ResponseTemplate>) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(SequenceResponder {
            calls: calls.clone(),
            responses,
        })
        .mount(server)
        .await;
    calls
}

fn success_body() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "content": "https://cdn.example.com/out.png" } }]
    }))
}

#[tokio::test]
async fn rate_limited_twice_then_succeeds_on_third_attempt() {
    let server = MockServer::start().await;
    let calls = mock_completions(
        &server,
        vec![
            ResponseTemplate::new(429).set_body_string("rate limit exceeded"),
            ResponseTemplate::new(429).set_body_string("rate limit exceeded"),
            success_body(),
        ],
    )
    .await;

    let config = test_config(&server.uri());
    let client = UpstreamClient::new(&config).unwrap();

    let response = client
        .send("a red fox", None, &config.image_model)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        response["choices"][0]["message"]["content"],
        json!("https://cdn.example.com/out.png")
    );
}

#[tokio::test]
async fn persistent_rate_limiting_fails_after_exactly_three_attempts() {
    let server = MockServer::start().await;
    let calls = mock_completions(
        &server,
        vec![ResponseTemplate::new(429).set_body_string("rate limit exceeded")],
    )
    .await;

    let config = test_config(&server.uri());
    let client = UpstreamClient::new(&config).unwrap();

    let err = client
        .send("a red fox", None, &config.image_model)
        .await
        .unwrap_err();

    assert!(matches!(err, UpstreamError::RateLimited { attempts: 3 }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn backoff_delays_double_between_attempts() {
    let server = MockServer::start().await;
    let calls = mock_completions(
        &server,
        vec![
            ResponseTemplate::new(429),
            ResponseTemplate::new(429),
            success_body(),
        ],
    )
    .await;

    let mut config = test_config(&server.uri());
    config.retry_base_delay = Duration::from_millis(25);
    let client = UpstreamClient::new(&config).unwrap();

    let started = Instant::now();
    client
        .send("a red fox", None, &config.image_model)
        .await
        .unwrap();

    // Delay before the 2nd attempt is 2x the base, before the 3rd 4x.
    assert!(started.elapsed() >= Duration::from_millis(140));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unauthorized_is_surfaced_without_retry() {
    let server = MockServer::start().await;
    let calls = mock_completions(
        &server,
        vec![ResponseTemplate::new(401).set_body_string("invalid key")],
    )
    .await;

    let config = test_config(&server.uri());
    let client = UpstreamClient::new(&config).unwrap();

    let err = client
        .send("a red fox", None, &config.image_model)
        .await
        .unwrap_err();

    assert!(matches!(err, UpstreamError::Unauthorized(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn other_upstream_errors_are_surfaced_without_retry() {
    let server = MockServer::start().await;
    let calls = mock_completions(
        &server,
        vec![ResponseTemplate::new(402).set_body_string("insufficient credits")],
    )
    .await;

    let config = test_config(&server.uri());
    let client = UpstreamClient::new(&config).unwrap();

    let err = client
        .send("a red fox", None, &config.image_model)
        .await
        .unwrap_err();

    match err {
        UpstreamError::Api { status, message } => {
            assert_eq!(status, 402);
            assert_eq!(message, "insufficient credits");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
