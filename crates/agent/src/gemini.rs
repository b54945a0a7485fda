//! Gemini `generateContent` client.
//!
//! Text and image requests go to different models; the image model is asked
//! for both TEXT and IMAGE response modalities.

use std::time::Duration;

use async_trait::async_trait;
use knatty_core::config::GeminiConfig;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::{BackendError, ContentPart, GenerativeService, InlineImage};

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: SecretString,
    base_url: String,
    text_model: String,
    image_model: String,
}

impl GeminiClient {
    pub fn from_config(config: &GeminiConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| BackendError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.base_url)
    }

    /// Looks up both configured models; used as a readiness probe.
    pub async fn verify_models(&self) -> Result<(), BackendError> {
        for model in [&self.text_model, &self.image_model] {
            let response = self
                .client
                .get(format!("{}/models/{model}", self.base_url))
                .header(API_KEY_HEADER, self.api_key.expose_secret())
                .send()
                .await
                .map_err(|error| BackendError::Transport(error.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body_text = response.text().await.unwrap_or_default();
                return Err(map_http_error(status, body_text));
            }
        }
        Ok(())
    }

    async fn send_request(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, BackendError> {
        debug!(event_name = "assistant.gemini.request", model, "sending generateContent request");

        let response = self
            .client
            .post(self.endpoint(model))
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|error| BackendError::Transport(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read Gemini error body".to_string());
            return Err(map_http_error(status, body_text));
        }

        response.json().await.map_err(|error| BackendError::Decode(error.to_string()))
    }
}

#[async_trait]
impl GenerativeService for GeminiClient {
    async fn generate_text(&self, prompt: &str) -> Result<String, BackendError> {
        let request = GenerateContentRequest::user_prompt(prompt, None);
        let response = self.send_request(&self.text_model, &request).await?;
        extract_text(response)
    }

    async fn generate_image(&self, prompt: &str) -> Result<Vec<ContentPart>, BackendError> {
        let request = GenerateContentRequest::user_prompt(
            prompt,
            Some(GenerationConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            }),
        );
        let response = self.send_request(&self.image_model, &request).await?;
        Ok(first_candidate_parts(response).into_iter().map(ContentPart::from).collect())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    fn user_prompt(prompt: &str, generation_config: Option<GenerationConfig>) -> Self {
        Self {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![RequestPart { text: prompt.to_string() }],
            }],
            generation_config,
        }
    }
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartResponse {
    text: Option<String>,
    inline_data: Option<InlineDataResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataResponse {
    mime_type: String,
    data: String,
}

impl From<PartResponse> for ContentPart {
    fn from(part: PartResponse) -> Self {
        Self {
            text: part.text,
            inline_image: part
                .inline_data
                .map(|inline| InlineImage { mime_type: inline.mime_type, data: inline.data }),
        }
    }
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

fn first_candidate_parts(response: GenerateContentResponse) -> Vec<PartResponse> {
    response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .unwrap_or_default()
}

fn extract_text(response: GenerateContentResponse) -> Result<String, BackendError> {
    let texts = first_candidate_parts(response)
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>();

    if texts.is_empty() {
        return Err(BackendError::EmptyResponse);
    }
    Ok(texts.concat())
}

fn map_http_error(status: StatusCode, body: String) -> BackendError {
    let message = serde_json::from_str::<ErrorWrapper>(&body)
        .map(|wrapper| {
            let status_text = wrapper.error.status.unwrap_or_default();
            let msg = wrapper.error.message.unwrap_or_else(|| body.clone());
            if status_text.is_empty() {
                msg
            } else {
                format!("{status_text}: {msg}")
            }
        })
        .unwrap_or_else(|_| body.clone());

    BackendError::Service { status: status.as_u16(), message }
}
