use std::sync::Arc;

use knatty_agent::gemini::GeminiClient;
use knatty_agent::llm::{BackendError, GenerationBackends};
use knatty_core::config::{AppConfig, ConfigError};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub backends: GenerationBackends,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("generative service client could not be created: {0}")]
    GenerativeClient(#[source] BackendError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let client =
        GeminiClient::from_config(&config.gemini).map_err(BootstrapError::GenerativeClient)?;
    info!(
        event_name = "system.bootstrap.gemini_ready",
        correlation_id = "bootstrap",
        text_model = %config.gemini.text_model,
        image_model = %config.gemini.image_model,
        "gemini client initialized"
    );

    Ok(Application { config, backends: GenerationBackends::new(Arc::new(client)) })
}

#[cfg(test)]
mod tests {
    use knatty_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        let config = AppConfig::load(options)?;
        bootstrap_with_config(config).await
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_api_key() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                gemini_api_key: Some("   ".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("gemini.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_builds_backends_with_valid_overrides() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                gemini_api_key: Some("test-key".to_string()),
                port: Some(18080),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with valid overrides");

        assert_eq!(app.config.server.port, 18080);
    }
}
