use std::sync::Arc;

use async_trait::async_trait;
use knatty_core::data_uri;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("generative service request failed: {0}")]
    Transport(String),
    #[error("generative service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("generative service response could not be decoded: {0}")]
    Decode(String),
    #[error("generative service returned no text")]
    EmptyResponse,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 payload exactly as the service returned it.
    pub data: String,
}

/// One part of a multi-modal completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentPart {
    pub text: Option<String>,
    pub inline_image: Option<InlineImage>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), inline_image: None }
    }

    pub fn image(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: None,
            inline_image: Some(InlineImage { mime_type: mime_type.into(), data: data.into() }),
        }
    }
}

/// Outbound generative-AI service. Each call is a single attempt.
#[async_trait]
pub trait GenerativeService: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String, BackendError>;
    async fn generate_image(&self, prompt: &str) -> Result<Vec<ContentPart>, BackendError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextOutcome {
    Generated(String),
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageOutcome {
    Generated { caption: String, image_url: String },
    NoImageProduced,
    Failed,
}

/// Text and multi-modal generation over one service handle. Failures are
/// logged here and reported as outcomes, never as errors.
#[derive(Clone)]
pub struct GenerationBackends {
    service: Arc<dyn GenerativeService>,
}

impl GenerationBackends {
    pub fn new(service: Arc<dyn GenerativeService>) -> Self {
        Self { service }
    }

    pub async fn generate_text(&self, prompt: &str) -> TextOutcome {
        match self.service.generate_text(prompt).await {
            Ok(text) => TextOutcome::Generated(text),
            Err(error) => {
                warn!(
                    event_name = "assistant.backend.text_failed",
                    error = %error,
                    "text generation failed"
                );
                TextOutcome::Failed
            }
        }
    }

    pub async fn generate_image(&self, prompt: &str) -> ImageOutcome {
        match self.service.generate_image(prompt).await {
            Ok(parts) => select_image(&parts),
            Err(error) => {
                warn!(
                    event_name = "assistant.backend.image_failed",
                    error = %error,
                    "image generation failed"
                );
                ImageOutcome::Failed
            }
        }
    }
}

/// First `image/*` inline part is the image, first text part is the caption.
pub fn select_image(parts: &[ContentPart]) -> ImageOutcome {
    let image = parts
        .iter()
        .filter_map(|part| part.inline_image.as_ref())
        .find(|image| image.mime_type.starts_with("image/"));

    let Some(image) = image else {
        return ImageOutcome::NoImageProduced;
    };

    let caption = parts.iter().find_map(|part| part.text.clone()).unwrap_or_default();
    ImageOutcome::Generated { caption, image_url: data_uri(&image.mime_type, &image.data) }
}
