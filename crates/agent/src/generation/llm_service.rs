use std::collections::BTreeMap;

use async_trait::async_trait;
use docwright_core::domain::schema::DocumentSchema;
use docwright_core::domain::session::{FieldValue, Turn, TurnRole};
use docwright_core::extraction::RawCandidate;
use serde_json::Value;
use tracing::warn;

use super::{ConversationContext, ConverseReply, GenerationError, GenerationService};
use crate::llm::{ChatMessage, CompletionRequest, LlmClient};

/// Literal token the conversation model emits once it believes every field is known.
pub const COLLECTION_COMPLETE_MARKER: &str = "COLLECTION_COMPLETE";

const CONVERSATION_TEMPERATURE: f32 = 0.2;
const CONVERSATION_MAX_TOKENS: u32 = 400;
const EXTRACTION_MAX_TOKENS: u32 = 500;
const DRAFT_MAX_TOKENS: u32 = 2_000;

const OPENING_USER_MESSAGE: &str = "Hello, I'd like to create a document.";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a courteous assistant collecting the details \
needed to prepare a legal document. Ask for one missing detail at a time and keep replies \
short. Never give legal advice and never suggest values the user has not stated.

Fields to collect:
{fields}

Collected so far:
{collected}

When every required field has been provided, confirm briefly and end your reply with \
COLLECTION_COMPLETE.";

const DRAFTER_SYSTEM_PROMPT: &str = "You are a legal document drafter. Your job is to fill in \
a legal document template using ONLY the data provided.

STRICT RULES:
1. Use ONLY the data provided in the user message. Never invent names, dates, amounts, or any facts.
2. Do NOT provide legal advice or commentary.
3. Do NOT add clauses, terms, or provisions not in the template.
4. Format lists cleanly.
5. If a field value is missing, write \"Not specified\" in that section.
6. Return ONLY the filled document text. No preamble, no explanation.";

/// Generation service backed by an OpenAI-compatible chat model.
pub struct LlmGenerationService<C> {
    client: C,
    conversation_model: String,
    drafting_model: String,
}

impl<C> LlmGenerationService<C>
where
    C: LlmClient,
{
    pub fn new(
        client: C,
        conversation_model: impl Into<String>,
        drafting_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            conversation_model: conversation_model.into(),
            drafting_model: drafting_model.into(),
        }
    }
}

pub(crate) fn system_prompt(context: &ConversationContext) -> String {
    let schema = &context.schema;
    let fields = schema
        .fields
        .iter()
        .map(|spec| {
            let description = if spec.prompt_hint.trim().is_empty() {
                spec.display_label()
            } else {
                spec.prompt_hint.clone()
            };
            if spec.required {
                format!("- {}: {description}", spec.name)
            } else {
                format!("- {} (optional): {description}", spec.name)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    let collected = if context.collected.is_empty() {
        "Nothing yet".to_string()
    } else {
        serde_json::to_string_pretty(&context.collected).unwrap_or_default()
    };

    let template = schema.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let mut prompt = template.replace("{fields}", &fields).replace("{collected}", &collected);
    prompt.push_str(&format!(
        "\n\nIMPORTANT: Today's actual date is {}. Use this as the current date for all purposes.",
        context.today.format("%d-%B-%Y")
    ));
    prompt
}

fn extraction_prompt(schema: &DocumentSchema, turns: &[Turn]) -> String {
    let transcript = turns
        .iter()
        .filter(|turn| turn.role == TurnRole::User)
        .map(|turn| format!("[turn {}] {}", turn.index, turn.text))
        .collect::<Vec<_>>()
        .join("\n");
    let names = schema.fields.iter().map(|spec| spec.name.as_str()).collect::<Vec<_>>().join(", ");

    format!(
        "Look at these user messages and extract ONLY values that the user has EXPLICITLY stated.

User messages:
{transcript}

Fields to extract: {names}

STRICT RULES:
- ONLY extract a field if the user directly said the value
- Copy the value exactly as the user wrote it
- Do NOT infer, guess, or assume any values
- If unsure, leave the field out entirely
- Return ONLY a JSON object, nothing else

Example: if the user said \"[turn 2] my name is John\", return {{\"name\": {{\"value\": \"John\", \"turn\": 2}}}}"
    )
}

fn draft_prompt(
    schema: &DocumentSchema,
    fields: &BTreeMap<String, FieldValue>,
    rendered: &str,
) -> String {
    let data = schema
        .fields
        .iter()
        .filter_map(|spec| {
            fields.get(&spec.name).map(|value| format!("{}: {}", spec.name, value.value.canonical()))
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Format the following legal document using ONLY this data:

COLLECTED DATA:
{data}

DOCUMENT (all placeholders are already filled):
{rendered}

Return the complete document."
    )
}

/// Reads field candidates from a model reply. The JSON object is sliced out
/// of any surrounding prose; output without a parsable object yields no
/// candidates. Values may be plain strings or numbers, or objects carrying
/// `value` and `turn`.
pub fn parse_candidates(schema: &DocumentSchema, raw: &str) -> Vec<RawCandidate> {
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }

    let object = match serde_json::from_str::<Value>(&raw[start..=end]) {
        Ok(Value::Object(object)) => object,
        Ok(_) => return Vec::new(),
        Err(error) => {
            warn!(
                event_name = "generation.extract.unparsable",
                error = %error,
                "extraction reply did not contain a JSON object"
            );
            return Vec::new();
        }
    };

    let mut candidates = Vec::new();
    for spec in &schema.fields {
        let Some(entry) = object.get(&spec.name) else {
            continue;
        };
        let (value, turn_index) = match entry {
            Value::Object(inner) => (
                inner.get("value").and_then(scalar_text),
                inner.get("turn").and_then(Value::as_u64).map(|turn| turn as usize),
            ),
            other => (scalar_text(other), None),
        };
        if let Some(value) = value.filter(|value| !value.trim().is_empty()) {
            candidates.push(RawCandidate { field: spec.name.clone(), value, turn_index });
        }
    }
    candidates
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[async_trait]
impl<C> GenerationService for LlmGenerationService<C>
where
    C: LlmClient,
{
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn converse(
        &self,
        context: &ConversationContext,
    ) -> Result<ConverseReply, GenerationError> {
        let mut messages = vec![ChatMessage::system(system_prompt(context))];
        if context.has_user_turns() {
            messages.extend(context.turns.iter().map(|turn| match turn.role {
                TurnRole::User => ChatMessage::user(turn.text.clone()),
                TurnRole::System => ChatMessage::assistant(turn.text.clone()),
            }));
        } else {
            messages.push(ChatMessage::user(OPENING_USER_MESSAGE));
        }

        let text = self
            .client
            .complete(CompletionRequest {
                model: self.conversation_model.clone(),
                messages,
                temperature: CONVERSATION_TEMPERATURE,
                max_tokens: CONVERSATION_MAX_TOKENS,
            })
            .await?;
        Ok(ConverseReply::new(text))
    }

    async fn extract(
        &self,
        schema: &DocumentSchema,
        turns: &[Turn],
    ) -> Result<Vec<RawCandidate>, GenerationError> {
        let raw = self
            .client
            .complete(CompletionRequest {
                model: self.conversation_model.clone(),
                messages: vec![ChatMessage::user(extraction_prompt(schema, turns))],
                temperature: 0.0,
                max_tokens: EXTRACTION_MAX_TOKENS,
            })
            .await?;
        Ok(parse_candidates(schema, &raw))
    }

    async fn draft(
        &self,
        schema: &DocumentSchema,
        fields: &BTreeMap<String, FieldValue>,
        rendered: &str,
    ) -> Result<String, GenerationError> {
        self.client
            .complete(CompletionRequest {
                model: self.drafting_model.clone(),
                messages: vec![
                    ChatMessage::system(DRAFTER_SYSTEM_PROMPT),
                    ChatMessage::user(draft_prompt(schema, fields, rendered)),
                ],
                temperature: 0.0,
                max_tokens: DRAFT_MAX_TOKENS,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use docwright_core::domain::schema::{DocumentSchema, FieldSpec, FieldType};
    use docwright_core::domain::session::{Turn, TurnRole};

    use super::{parse_candidates, system_prompt, LlmGenerationService};
    use crate::generation::{ConversationContext, GenerationError, GenerationService};
    use crate::llm::{ChatRole, CompletionRequest, LlmClient};

    #[derive(Default)]
    struct RecordingClient {
        reply: String,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmClient for Arc<RecordingClient> {
        async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError> {
            self.requests.lock().expect("requests lock").push(request);
            Ok(self.reply.clone())
        }
    }

    fn schema() -> DocumentSchema {
        DocumentSchema {
            doc_type_id: "nda".to_string(),
            display_name: "Mutual NDA".to_string(),
            description: String::new(),
            fields: vec![
                FieldSpec::new("party_a", FieldType::String).with_hint("first party's legal name"),
                FieldSpec::new("term_years", FieldType::Number),
                FieldSpec::new("notes", FieldType::String).optional(),
            ],
            template_ref: String::new(),
            template_text: String::new(),
            system_prompt: Some("Collect:\n{fields}\nSo far: {collected}".to_string()),
            guardrails: Default::default(),
        }
    }

    fn context(turns: Vec<Turn>) -> ConversationContext {
        let mut collected = BTreeMap::new();
        collected.insert("party_a".to_string(), "Acme Corp".to_string());
        ConversationContext {
            schema: Arc::new(schema()),
            turns,
            collected,
            missing: vec!["term_years".to_string()],
            today: NaiveDate::from_ymd_opt(2026, 10, 15).expect("date"),
        }
    }

    #[test]
    fn system_prompt_fills_slots_and_pins_the_date() {
        let prompt = system_prompt(&context(Vec::new()));
        assert!(prompt.contains("- party_a: first party's legal name"));
        assert!(prompt.contains("- notes (optional): notes"));
        assert!(prompt.contains("\"party_a\": \"Acme Corp\""));
        assert!(prompt.ends_with(
            "IMPORTANT: Today's actual date is 15-October-2026. Use this as the current date for all purposes."
        ));
    }

    #[test]
    fn candidates_are_sliced_from_surrounding_prose() {
        let raw = "Sure! Here you go:\n{\"party_a\": {\"value\": \"Acme Corp\", \"turn\": 0}, \"term_years\": 5, \"unknown\": \"x\"}\nDone.";
        let candidates = parse_candidates(&schema(), raw);

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].field, "party_a");
        assert_eq!(candidates[0].value, "Acme Corp");
        assert_eq!(candidates[0].turn_index, Some(0));
        assert_eq!(candidates[1].value, "5");
        assert_eq!(candidates[1].turn_index, None);
    }

    #[test]
    fn unparsable_extraction_output_yields_no_candidates() {
        assert!(parse_candidates(&schema(), "I could not find anything").is_empty());
        assert!(parse_candidates(&schema(), "{ not json }").is_empty());
    }

    #[tokio::test]
    async fn conversation_replays_turns_with_assistant_roles() {
        let client = Arc::new(RecordingClient {
            reply: "What is the term?".to_string(),
            ..Default::default()
        });
        let service = LlmGenerationService::new(Arc::clone(&client), "small", "large");
        let turns = vec![
            Turn {
                role: TurnRole::System,
                text: "Hello!".to_string(),
                index: 0,
                timestamp: Utc::now(),
            },
            Turn {
                role: TurnRole::User,
                text: "Party A is Acme Corp".to_string(),
                index: 1,
                timestamp: Utc::now(),
            },
        ];

        let reply = service.converse(&context(turns)).await.expect("reply");
        assert_eq!(reply.follow_up_text, "What is the term?");

        let requests = client.requests.lock().expect("requests lock");
        assert_eq!(requests[0].model, "small");
        assert_eq!(requests[0].temperature, 0.2);
        let roles: Vec<ChatRole> = requests[0].messages.iter().map(|message| message.role).collect();
        assert_eq!(roles, vec![ChatRole::System, ChatRole::Assistant, ChatRole::User]);
    }

    #[tokio::test]
    async fn drafting_uses_the_drafting_model_at_zero_temperature() {
        let client =
            Arc::new(RecordingClient { reply: "DRAFT".to_string(), ..Default::default() });
        let service = LlmGenerationService::new(Arc::clone(&client), "small", "large");

        let text = service.draft(&schema(), &BTreeMap::new(), "Rendered body").await.expect("draft");
        assert_eq!(text, "DRAFT");

        let requests = client.requests.lock().expect("requests lock");
        assert_eq!(requests[0].model, "large");
        assert_eq!(requests[0].temperature, 0.0);
        assert!(requests[0].messages[1].content.contains("Rendered body"));
    }
}
