use std::env;
use std::fs;
use std::path::Path;

use knatty_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let api_key = redact_key(config.gemini.api_key.expose_secret());
    let entries = [
        ("gemini.api_key", api_key, "KNATTY_GEMINI_API_KEY"),
        ("gemini.base_url", config.gemini.base_url.clone(), "KNATTY_GEMINI_BASE_URL"),
        ("gemini.text_model", config.gemini.text_model.clone(), "KNATTY_GEMINI_TEXT_MODEL"),
        ("gemini.image_model", config.gemini.image_model.clone(), "KNATTY_GEMINI_IMAGE_MODEL"),
        (
            "gemini.timeout_secs",
            config.gemini.timeout_secs.to_string(),
            "KNATTY_GEMINI_TIMEOUT_SECS",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "KNATTY_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "KNATTY_SERVER_PORT"),
        (
            "server.session_idle_timeout_secs",
            config.server.session_idle_timeout_secs.to_string(),
            "KNATTY_SERVER_SESSION_IDLE_TIMEOUT_SECS",
        ),
        ("logging.level", config.logging.level.clone(), "KNATTY_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "KNATTY_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_key) in entries {
        lines.push(render_line(key_path, &value, source(key_path, env_key)));
    }

    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    // Gemini keys share a fixed `AIza` prefix, so only that much is shown.
    match trimmed.get(..4) {
        Some(prefix) if trimmed.len() > 8 => format!("{prefix}***"),
        _ => "<redacted>".to_string(),
    }
}
