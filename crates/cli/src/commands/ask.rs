use std::sync::Arc;

use knatty_agent::gemini::GeminiClient;
use knatty_agent::llm::GenerationBackends;
use knatty_agent::runtime::{AssistantSession, TurnOutcome};
use knatty_core::config::{AppConfig, LoadOptions};
use knatty_core::Message;
use serde::Serialize;

use crate::commands::CommandResult;

const COMMAND: &str = "ask";

#[derive(Debug, Serialize)]
struct AskReport {
    command: &'static str,
    status: &'static str,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    intent: Option<&'static str>,
    transcript: Vec<Message>,
}

pub fn run(utterance: &str, authenticated: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("configuration did not load: {error}"),
                2,
            );
        }
    };

    let client = match GeminiClient::from_config(&config.gemini) {
        Ok(client) => client,
        Err(error) => {
            return CommandResult::failure(COMMAND, "gemini_client", error.to_string(), 3);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                4,
            );
        }
    };

    let session = AssistantSession::new(GenerationBackends::new(Arc::new(client)));
    let report = runtime.block_on(async {
        session.open_widget().await;
        let outcome = session.submit(utterance, authenticated).await;

        let (outcome, intent) = match outcome {
            TurnOutcome::Ignored(reason) => (reason.as_str(), None),
            TurnOutcome::Completed { intent, .. } => ("completed", Some(intent.as_str())),
            TurnOutcome::Discarded { intent } => ("discarded", Some(intent.as_str())),
        };

        AskReport {
            command: COMMAND,
            status: "ok",
            outcome,
            intent,
            transcript: session.snapshot().await,
        }
    });

    match serde_json::to_string_pretty(&report) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure(
            COMMAND,
            "serialization",
            format!("transcript could not be rendered: {error}"),
            5,
        ),
    }
}
