//! Generative provider contract
//!
//! One request/response call per work item. Implementations never retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors from a generative provider call
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The call did not finish within the provider's deadline
    #[error("provider call timed out")]
    Timeout,

    /// Transport-level failure (connection, TLS, body read)
    #[error("request failed: {0}")]
    Request(String),

    /// Non-success HTTP status
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response was malformed or lacked the requested output
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Provider is missing credentials or a model name
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRequest {
    pub prompt: String,
}

impl TextRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

/// Image bytes passed to or returned from the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImageData {
    /// File extension for the MIME type, `png` when unknown
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

/// Alias kept for call sites that only ever receive images
pub type GeneratedImage = ImageData;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    /// Main reference (the page template); sent before the prompt
    pub template: Option<ImageData>,
    /// Additional references; sent after the prompt
    pub reference_images: Vec<ImageData>,
    pub aspect_ratio: String,
    pub resolution: String,
}

/// External generative service
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Generate plain text for a prompt
    async fn generate_text(&self, request: TextRequest) -> Result<String, ProviderError>;

    /// Generate one image for a prompt and optional reference images
    async fn generate_image(&self, request: ImageRequest)
        -> Result<GeneratedImage, ProviderError>;
}
