use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use image_proxy_service::AppConfig;

/// Config pointed at a test upstream, with backoff shrunk so retry tests
/// finish quickly.
pub fn test_config(base_url: &str) -> AppConfig {
    AppConfig {
        listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        upstream_base_url: base_url.to_string(),
        upstream_api_key: "sk-or-test-0123456789".to_string(),
        image_model: "google/gemini-2.5-flash-image-preview".to_string(),
        app_url: "http://localhost:3000".to_string(),
        app_title: "Image Generation App".to_string(),
        max_image_size: 5 * 1024 * 1024,
        upstream_timeout: Duration::from_secs(5),
        retry_base_delay: Duration::from_millis(5),
        auth_token: None,
    }
}
