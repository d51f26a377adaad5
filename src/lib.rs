pub mod config;
pub mod error;
pub mod normalizer;
pub mod server;
pub mod service;
pub mod upstream;

pub use config::AppConfig;
pub use error::ServiceError;
pub use server::build_router;
pub use service::{GenerationRequest, GenerationResult, ImageService, TransformRequest};
