use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use docwright_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Source<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = Source { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut push = |key: &str, value: &str, env_key: &str| {
        lines.push(render_line(key, value, field_source(key, Some(env_key), &source)));
    };

    push("llm.provider", config.llm.provider.as_str(), "DOCWRIGHT_LLM_PROVIDER");
    push("llm.api_key", &redact_key(config.llm.api_key.as_ref()), "DOCWRIGHT_LLM_API_KEY");
    push(
        "llm.base_url",
        config.llm_base_url().as_deref().unwrap_or("<unset>"),
        "DOCWRIGHT_LLM_BASE_URL",
    );
    push(
        "llm.conversation_model",
        &config.llm.conversation_model,
        "DOCWRIGHT_LLM_CONVERSATION_MODEL",
    );
    push("llm.drafting_model", &config.llm.drafting_model, "DOCWRIGHT_LLM_DRAFTING_MODEL");
    push("llm.timeout_secs", &config.llm.timeout_secs.to_string(), "DOCWRIGHT_LLM_TIMEOUT_SECS");
    push("llm.max_retries", &config.llm.max_retries.to_string(), "DOCWRIGHT_LLM_MAX_RETRIES");

    push("session.ttl_secs", &config.session.ttl_secs.to_string(), "DOCWRIGHT_SESSION_TTL_SECS");
    push(
        "session.violation_threshold",
        &config.session.violation_threshold.to_string(),
        "DOCWRIGHT_SESSION_VIOLATION_THRESHOLD",
    );
    push(
        "session.max_extraction_attempts",
        &config.session.max_extraction_attempts.to_string(),
        "DOCWRIGHT_SESSION_MAX_EXTRACTION_ATTEMPTS",
    );
    push(
        "session.max_draft_attempts",
        &config.session.max_draft_attempts.to_string(),
        "DOCWRIGHT_SESSION_MAX_DRAFT_ATTEMPTS",
    );
    push(
        "session.max_message_chars",
        &config.session.max_message_chars.to_string(),
        "DOCWRIGHT_SESSION_MAX_MESSAGE_CHARS",
    );

    push(
        "schemas.directory",
        &config.schemas.directory.display().to_string(),
        "DOCWRIGHT_SCHEMAS_DIRECTORY",
    );
    push(
        "schemas.templates_directory",
        &config.schemas.templates_directory.display().to_string(),
        "DOCWRIGHT_SCHEMAS_TEMPLATES_DIRECTORY",
    );

    push("server.bind_address", &config.server.bind_address, "DOCWRIGHT_SERVER_BIND_ADDRESS");
    push("server.port", &config.server.port.to_string(), "DOCWRIGHT_SERVER_PORT");

    push("logging.level", &config.logging.level, "DOCWRIGHT_LOGGING_LEVEL");
    push("logging.format", &format!("{:?}", config.logging.format), "DOCWRIGHT_LOGGING_FORMAT");

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("docwright.toml"), PathBuf::from("config/docwright.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(key_path: &str, env_key: Option<&str>, source: &Source<'_>) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = source.doc {
        if contains_path(doc, key_path) {
            let file_path = source
                .path
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

/// Keeps the vendor prefix (`sk-`, `gsk_`) and hides the rest.
fn redact_key(key: Option<&SecretString>) -> String {
    let Some(key) = key else {
        return "<unset>".to_string();
    };
    let trimmed = key.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.find(['-', '_']) {
        Some(split) if split <= 4 => format!("{}***", &trimmed[..=split]),
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::redact_key;

    #[test]
    fn api_keys_keep_only_their_prefix() {
        let groq = SecretString::from("gsk_live_abcdef".to_string());
        let openai = SecretString::from("sk-proj-abcdef".to_string());
        let opaque = SecretString::from("abcdefghijkl".to_string());

        assert_eq!(redact_key(Some(&groq)), "gsk_***");
        assert_eq!(redact_key(Some(&openai)), "sk-***");
        assert_eq!(redact_key(Some(&opaque)), "<redacted>");
        assert_eq!(redact_key(None), "<unset>");
    }
}
