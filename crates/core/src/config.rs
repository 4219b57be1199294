use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub session: SessionConfig,
    pub schemas: SchemaConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub conversation_model: String,
    pub drafting_model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub violation_threshold: u32,
    pub max_extraction_attempts: u32,
    pub max_draft_attempts: u32,
    pub max_message_chars: usize,
    pub min_message_chars: usize,
}

#[derive(Clone, Debug)]
pub struct SchemaConfig {
    pub directory: PathBuf,
    pub templates_directory: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Groq,
    Stub,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::Stub => "stub",
        }
    }

    /// Chat-completions endpoint used when `llm.base_url` is not set.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::Stub => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub conversation_model: Option<String>,
    pub drafting_model: Option<String>,
    pub schema_directory: Option<PathBuf>,
    pub templates_directory: Option<PathBuf>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Stub,
                api_key: None,
                base_url: None,
                conversation_model: "llama-3.1-8b-instant".to_string(),
                drafting_model: "llama-3.3-70b-versatile".to_string(),
                timeout_secs: 30,
                max_retries: 3,
                retry_base_delay_ms: 250,
                retry_max_delay_ms: 4_000,
            },
            session: SessionConfig {
                ttl_secs: 3_600,
                sweep_interval_secs: 60,
                violation_threshold: 3,
                max_extraction_attempts: 3,
                max_draft_attempts: 2,
                max_message_chars: 4_000,
                min_message_chars: 1,
            },
            schemas: SchemaConfig {
                directory: PathBuf::from("config/doc_types"),
                templates_directory: PathBuf::from("templates"),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "groq" => Ok(Self::Groq),
            "stub" => Ok(Self::Stub),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|groq|stub)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("docwright.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Base URL for the configured provider, falling back to its public endpoint.
    pub fn llm_base_url(&self) -> Option<String> {
        self.llm
            .base_url
            .clone()
            .or_else(|| self.llm.provider.default_base_url().map(str::to_string))
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(conversation_model) = llm.conversation_model {
                self.llm.conversation_model = conversation_model;
            }
            if let Some(drafting_model) = llm.drafting_model {
                self.llm.drafting_model = drafting_model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(retry_base_delay_ms) = llm.retry_base_delay_ms {
                self.llm.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(retry_max_delay_ms) = llm.retry_max_delay_ms {
                self.llm.retry_max_delay_ms = retry_max_delay_ms;
            }
        }

        if let Some(session) = patch.session {
            if let Some(ttl_secs) = session.ttl_secs {
                self.session.ttl_secs = ttl_secs;
            }
            if let Some(sweep_interval_secs) = session.sweep_interval_secs {
                self.session.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(violation_threshold) = session.violation_threshold {
                self.session.violation_threshold = violation_threshold;
            }
            if let Some(max_extraction_attempts) = session.max_extraction_attempts {
                self.session.max_extraction_attempts = max_extraction_attempts;
            }
            if let Some(max_draft_attempts) = session.max_draft_attempts {
                self.session.max_draft_attempts = max_draft_attempts;
            }
            if let Some(max_message_chars) = session.max_message_chars {
                self.session.max_message_chars = max_message_chars;
            }
            if let Some(min_message_chars) = session.min_message_chars {
                self.session.min_message_chars = min_message_chars;
            }
        }

        if let Some(schemas) = patch.schemas {
            if let Some(directory) = schemas.directory {
                self.schemas.directory = directory;
            }
            if let Some(templates_directory) = schemas.templates_directory {
                self.schemas.templates_directory = templates_directory;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("DOCWRIGHT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        let api_key = read_env("DOCWRIGHT_LLM_API_KEY").or_else(|| read_env("GROQ_API_KEY"));
        if let Some(value) = api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("DOCWRIGHT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("DOCWRIGHT_LLM_CONVERSATION_MODEL") {
            self.llm.conversation_model = value;
        }
        if let Some(value) = read_env("DOCWRIGHT_LLM_DRAFTING_MODEL") {
            self.llm.drafting_model = value;
        }
        if let Some(value) = read_env("DOCWRIGHT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("DOCWRIGHT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("DOCWRIGHT_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("DOCWRIGHT_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("DOCWRIGHT_LLM_RETRY_BASE_DELAY_MS") {
            self.llm.retry_base_delay_ms =
                parse_u64("DOCWRIGHT_LLM_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("DOCWRIGHT_LLM_RETRY_MAX_DELAY_MS") {
            self.llm.retry_max_delay_ms = parse_u64("DOCWRIGHT_LLM_RETRY_MAX_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("DOCWRIGHT_SESSION_TTL_SECS") {
            self.session.ttl_secs = parse_u64("DOCWRIGHT_SESSION_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("DOCWRIGHT_SESSION_SWEEP_INTERVAL_SECS") {
            self.session.sweep_interval_secs =
                parse_u64("DOCWRIGHT_SESSION_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("DOCWRIGHT_SESSION_VIOLATION_THRESHOLD") {
            self.session.violation_threshold =
                parse_u32("DOCWRIGHT_SESSION_VIOLATION_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("DOCWRIGHT_SESSION_MAX_EXTRACTION_ATTEMPTS") {
            self.session.max_extraction_attempts =
                parse_u32("DOCWRIGHT_SESSION_MAX_EXTRACTION_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("DOCWRIGHT_SESSION_MAX_DRAFT_ATTEMPTS") {
            self.session.max_draft_attempts =
                parse_u32("DOCWRIGHT_SESSION_MAX_DRAFT_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("DOCWRIGHT_SESSION_MAX_MESSAGE_CHARS") {
            self.session.max_message_chars =
                parse_usize("DOCWRIGHT_SESSION_MAX_MESSAGE_CHARS", &value)?;
        }

        if let Some(value) = read_env("DOCWRIGHT_SCHEMAS_DIRECTORY") {
            self.schemas.directory = PathBuf::from(value);
        }
        if let Some(value) = read_env("DOCWRIGHT_SCHEMAS_TEMPLATES_DIRECTORY") {
            self.schemas.templates_directory = PathBuf::from(value);
        }

        if let Some(value) = read_env("DOCWRIGHT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("DOCWRIGHT_SERVER_PORT") {
            self.server.port = parse_u16("DOCWRIGHT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("DOCWRIGHT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("DOCWRIGHT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("DOCWRIGHT_LOGGING_LEVEL").or_else(|| read_env("DOCWRIGHT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DOCWRIGHT_LOGGING_FORMAT").or_else(|| read_env("DOCWRIGHT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(conversation_model) = overrides.conversation_model {
            self.llm.conversation_model = conversation_model;
        }
        if let Some(drafting_model) = overrides.drafting_model {
            self.llm.drafting_model = drafting_model;
        }
        if let Some(directory) = overrides.schema_directory {
            self.schemas.directory = directory;
        }
        if let Some(templates_directory) = overrides.templates_directory {
            self.schemas.templates_directory = templates_directory;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_session(&self.session)?;
        validate_schemas(&self.schemas)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("docwright.toml"), PathBuf::from("config/docwright.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.retry_base_delay_ms > llm.retry_max_delay_ms {
        return Err(ConfigError::Validation(
            "llm.retry_base_delay_ms must not exceed llm.retry_max_delay_ms".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Groq => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(format!(
                    "llm.api_key is required for the {} provider (set DOCWRIGHT_LLM_API_KEY)",
                    llm.provider.as_str()
                )));
            }
            if llm.conversation_model.trim().is_empty() || llm.drafting_model.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "llm.conversation_model and llm.drafting_model must be set".to_string(),
                ));
            }
        }
        LlmProvider::Stub => {}
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "session.ttl_secs must be greater than zero".to_string(),
        ));
    }
    if session.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "session.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }
    if session.violation_threshold == 0 {
        return Err(ConfigError::Validation(
            "session.violation_threshold must be greater than zero".to_string(),
        ));
    }
    if session.max_extraction_attempts == 0 || session.max_draft_attempts == 0 {
        return Err(ConfigError::Validation(
            "session.max_extraction_attempts and session.max_draft_attempts must be at least 1"
                .to_string(),
        ));
    }
    if session.min_message_chars == 0 || session.min_message_chars > session.max_message_chars {
        return Err(ConfigError::Validation(
            "session.min_message_chars must be in range 1..=session.max_message_chars".to_string(),
        ));
    }

    Ok(())
}

fn validate_schemas(schemas: &SchemaConfig) -> Result<(), ConfigError> {
    if schemas.directory.as_os_str().is_empty() {
        return Err(ConfigError::Validation("schemas.directory must be set".to_string()));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    session: Option<SessionPatch>,
    schemas: Option<SchemaPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    conversation_model: Option<String>,
    drafting_model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    violation_threshold: Option<u32>,
    max_extraction_attempts: Option<u32>,
    max_draft_attempts: Option<u32>,
    max_message_chars: Option<usize>,
    min_message_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SchemaPatch {
    directory: Option<PathBuf>,
    templates_directory: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
