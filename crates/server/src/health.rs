use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use knatty_core::config::GeminiConfig;
use secrecy::ExposeSecret;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    text_model: String,
    image_model: String,
    api_key_configured: bool,
}

impl HealthState {
    pub fn from_config(gemini: &GeminiConfig) -> Self {
        Self {
            text_model: gemini.text_model.clone(),
            image_model: gemini.image_model.clone(),
            api_key_configured: !gemini.api_key.expose_secret().trim().is_empty(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub generative_service: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let generative_service = generative_service_check(&state);
    let ready = generative_service.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "knatty-server runtime initialized".to_string(),
        },
        generative_service,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn generative_service_check(state: &HealthState) -> HealthCheck {
    if state.api_key_configured {
        HealthCheck {
            status: "ready",
            detail: format!(
                "gemini configured (text: {}, image: {})",
                state.text_model, state.image_model
            ),
        }
    } else {
        HealthCheck { status: "degraded", detail: "gemini api key is not configured".to_string() }
    }
}
