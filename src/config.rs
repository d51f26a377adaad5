use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

pub const DEFAULT_IMAGE_MODEL: &str = "google/gemini-2.5-flash-image-preview";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub upstream_base_url: String,
    pub upstream_api_key: String,
    pub image_model: String,
    pub app_url: String,
    pub app_title: String,
    pub max_image_size: usize,
    pub upstream_timeout: Duration,
    pub retry_base_delay: Duration,
    pub auth_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));

        let upstream_base_url = env::var("OPENROUTER_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());
        let upstream_api_key = env::var("OPENROUTER_API_KEY").unwrap_or_default();

        let image_model =
            env::var("IMAGE_MODEL").unwrap_or_else(|_| DEFAULT_IMAGE_MODEL.to_string());

        let app_url = env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        let app_title =
            env::var("APP_TITLE").unwrap_or_else(|_| "Image Generation App".to_string());

        let max_image_size = env::var("MAX_IMAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5 * 1024 * 1024);

        let upstream_timeout = env::var("UPSTREAM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(120));

        let retry_base_delay = env::var("RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(1000));

        let auth_token = env::var("SERVICE_AUTH_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        Ok(Self {
            listen_addr,
            upstream_base_url,
            upstream_api_key,
            image_model,
            app_url,
            app_title,
            max_image_size,
            upstream_timeout,
            retry_base_delay,
            auth_token,
        })
    }
}

#[cfg(test)]
impl AppConfig {
    /// A config pointed at a local test upstream, with backoff shrunk so
    /// retry tests finish quickly.
    pub fn for_tests(base_url: &str) -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            upstream_base_url: base_url.to_string(),
            upstream_api_key: "sk-or-test-0123456789".to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            app_url: "http://localhost:3000".to_string(),
            app_title: "Image Generation App".to_string(),
            max_image_size: 5 * 1024 * 1024,
            upstream_timeout: Duration::from_secs(5),
            retry_base_delay: Duration::from_millis(5),
            auth_token: None,
        }
    }
}
