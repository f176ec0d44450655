pub mod openai;
pub mod retry;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use openai::VisionClient;
pub use retry::RetryPolicy;

/// Provider failures, classified where the HTTP response is translated.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VisionError {
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },
    #[error("provider server error: HTTP {status}")]
    ServerError { status: u16 },
    #[error("transient transport failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Terminal(String),
}

impl VisionError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, VisionError::Terminal(_))
    }

    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            VisionError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VisionError::RateLimited { .. } => "rate_limited",
            VisionError::ServerError { .. } => "server_error",
            VisionError::Transient(_) => "transient",
            VisionError::Terminal(_) => "terminal",
        }
    }
}

/// A hosted multimodal model: one prompt plus photos in, reply text out.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe(&self, prompt: &str, photos: &[String]) -> Result<String, VisionError>;
}
