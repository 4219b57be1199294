//! Port to the external text-generation service.
//!
//! The service is untrusted: its replies are hints, its extraction output is a
//! list of candidates that the deterministic extractor must locate in user
//! turns, and its drafts are checked for unsupported facts before delivery.

mod llm_service;
mod scripted;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use docwright_core::config::{AppConfig, LlmProvider};
use docwright_core::domain::schema::DocumentSchema;
use docwright_core::domain::session::{FieldValue, Turn, TurnRole};
use docwright_core::extraction::RawCandidate;
use thiserror::Error;

use crate::llm::OpenAiCompatibleClient;

pub use llm_service::{parse_candidates, LlmGenerationService, COLLECTION_COMPLETE_MARKER};
pub use scripted::{GenerationCall, ScriptedGenerationService};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation service timed out")]
    Timeout,
    #[error("generation transport failed: {0}")]
    Transport(String),
    #[error("generation service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("generation service returned an unusable response: {0}")]
    InvalidResponse(String),
    #[error("generation service is not configured: {0}")]
    NotConfigured(String),
}

impl GenerationError {
    /// Errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::InvalidResponse(_) | Self::NotConfigured(_) => false,
        }
    }
}

/// Everything the conversation model may see for one turn.
#[derive(Clone, Debug)]
pub struct ConversationContext {
    pub schema: Arc<DocumentSchema>,
    pub turns: Vec<Turn>,
    /// Provisional canonical values keyed by field name.
    pub collected: BTreeMap<String, String>,
    /// Required fields with no provisional value, in schema order.
    pub missing: Vec<String>,
    pub today: NaiveDate,
}

impl ConversationContext {
    pub fn has_user_turns(&self) -> bool {
        self.turns.iter().any(|turn| turn.role == TurnRole::User)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConverseReply {
    pub follow_up_text: String,
    pub ready_for_extraction: bool,
}

impl ConverseReply {
    pub fn new(follow_up_text: impl Into<String>) -> Self {
        Self { follow_up_text: follow_up_text.into(), ready_for_extraction: false }
    }

    pub fn ready(follow_up_text: impl Into<String>) -> Self {
        Self { follow_up_text: follow_up_text.into(), ready_for_extraction: true }
    }
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn converse(&self, context: &ConversationContext)
        -> Result<ConverseReply, GenerationError>;

    /// Proposed field values. Proposals are never trusted as-is.
    async fn extract(
        &self,
        schema: &DocumentSchema,
        turns: &[Turn],
    ) -> Result<Vec<RawCandidate>, GenerationError>;

    /// Drafts the final text. `rendered` is the template with every
    /// placeholder already substituted.
    async fn draft(
        &self,
        schema: &DocumentSchema,
        fields: &BTreeMap<String, FieldValue>,
        rendered: &str,
    ) -> Result<String, GenerationError>;
}

/// Deterministic offline service: asks for the first missing field, proposes
/// no candidates and returns the rendered template as the draft.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubGenerationService;

impl StubGenerationService {
    pub fn opening(schema: &DocumentSchema) -> String {
        let first = schema.required_fields().next().or_else(|| schema.fields.first());
        match first {
            Some(spec) => format!(
                "Hello! I'll help you prepare your {}. To begin, what is the {}?",
                schema.display_name(),
                spec.display_label()
            ),
            None => format!("Hello! I'll help you prepare your {}.", schema.display_name()),
        }
    }

    fn reply(context: &ConversationContext) -> ConverseReply {
        if !context.has_user_turns() {
            return ConverseReply::new(Self::opening(&context.schema));
        }

        let next = context.missing.first().and_then(|name| context.schema.field(name));
        match next {
            Some(spec) if spec.prompt_hint.trim().is_empty() => {
                ConverseReply::new(format!("Thanks. What is the {}?", spec.display_label()))
            }
            Some(spec) => ConverseReply::new(format!(
                "Thanks. What is the {}? ({})",
                spec.display_label(),
                spec.prompt_hint.trim()
            )),
            None => ConverseReply::ready(format!(
                "Thank you, I have everything needed for your {}. {COLLECTION_COMPLETE_MARKER}",
                context.schema.display_name()
            )),
        }
    }
}

#[async_trait]
impl GenerationService for StubGenerationService {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn converse(
        &self,
        context: &ConversationContext,
    ) -> Result<ConverseReply, GenerationError> {
        Ok(Self::reply(context))
    }

    async fn extract(
        &self,
        _schema: &DocumentSchema,
        _turns: &[Turn],
    ) -> Result<Vec<RawCandidate>, GenerationError> {
        Ok(Vec::new())
    }

    async fn draft(
        &self,
        _schema: &DocumentSchema,
        _fields: &BTreeMap<String, FieldValue>,
        rendered: &str,
    ) -> Result<String, GenerationError> {
        Ok(rendered.to_string())
    }
}

/// Builds the service selected by `llm.provider`.
pub fn service_from_config(
    config: &AppConfig,
) -> Result<Arc<dyn GenerationService>, GenerationError> {
    match config.llm.provider {
        LlmProvider::Stub => Ok(Arc::new(StubGenerationService)),
        LlmProvider::OpenAi | LlmProvider::Groq => {
            let api_key = config.llm.api_key.clone().ok_or_else(|| {
                GenerationError::NotConfigured(format!(
                    "provider `{}` requires an API key",
                    config.llm.provider.as_str()
                ))
            })?;
            let base_url = config.llm_base_url().ok_or_else(|| {
                GenerationError::NotConfigured("no base URL for provider".to_string())
            })?;
            let client = OpenAiCompatibleClient::new(
                base_url,
                api_key,
                Duration::from_secs(config.llm.timeout_secs),
            )?;
            Ok(Arc::new(LlmGenerationService::new(
                client,
                config.llm.conversation_model.clone(),
                config.llm.drafting_model.clone(),
            )))
        }
    }
}
