use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use docwright_core::domain::schema::DocumentSchema;
use docwright_core::domain::session::{FieldValue, Turn};
use docwright_core::extraction::RawCandidate;

use super::{
    ConversationContext, ConverseReply, GenerationError, GenerationService, StubGenerationService,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationCall {
    Converse { turn_count: usize },
    Extract { turn_count: usize },
    Draft { doc_type_id: String },
}

/// Test double that replays queued responses and records every call. An
/// empty queue falls back to [`StubGenerationService`].
#[derive(Default)]
pub struct ScriptedGenerationService {
    converse: Mutex<VecDeque<Result<ConverseReply, GenerationError>>>,
    extract: Mutex<VecDeque<Result<Vec<RawCandidate>, GenerationError>>>,
    draft: Mutex<VecDeque<Result<String, GenerationError>>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<GenerationCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedGenerationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_converse(&self, response: Result<ConverseReply, GenerationError>) -> &Self {
        lock(&self.converse).push_back(response);
        self
    }

    pub fn push_extract(&self, response: Result<Vec<RawCandidate>, GenerationError>) -> &Self {
        lock(&self.extract).push_back(response);
        self
    }

    pub fn push_draft(&self, response: Result<String, GenerationError>) -> &Self {
        lock(&self.draft).push_back(response);
        self
    }

    /// Every subsequent call sleeps this long before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    pub fn calls(&self) -> Vec<GenerationCall> {
        lock(&self.calls).clone()
    }

    pub fn draft_calls(&self) -> usize {
        lock(&self.calls).iter().filter(|call| matches!(call, GenerationCall::Draft { .. })).count()
    }

    pub fn extract_calls(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, GenerationCall::Extract { .. }))
            .count()
    }

    async fn record(&self, call: GenerationCall) {
        lock(&self.calls).push(call);
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerationService {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn converse(
        &self,
        context: &ConversationContext,
    ) -> Result<ConverseReply, GenerationError> {
        self.record(GenerationCall::Converse { turn_count: context.turns.len() }).await;
        let scripted = lock(&self.converse).pop_front();
        match scripted {
            Some(response) => response,
            None => StubGenerationService.converse(context).await,
        }
    }

    async fn extract(
        &self,
        schema: &DocumentSchema,
        turns: &[Turn],
    ) -> Result<Vec<RawCandidate>, GenerationError> {
        self.record(GenerationCall::Extract { turn_count: turns.len() }).await;
        let scripted = lock(&self.extract).pop_front();
        match scripted {
            Some(response) => response,
            None => StubGenerationService.extract(schema, turns).await,
        }
    }

    async fn draft(
        &self,
        schema: &DocumentSchema,
        fields: &BTreeMap<String, FieldValue>,
        rendered: &str,
    ) -> Result<String, GenerationError> {
        self.record(GenerationCall::Draft { doc_type_id: schema.doc_type_id.clone() }).await;
        let scripted = lock(&self.draft).pop_front();
        match scripted {
            Some(response) => response,
            None => StubGenerationService.draft(schema, fields, rendered).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use docwright_core::domain::schema::DocumentSchema;

    use super::{GenerationCall, ScriptedGenerationService};
    use crate::generation::{GenerationError, GenerationService};

    fn schema() -> DocumentSchema {
        DocumentSchema {
            doc_type_id: "nda".to_string(),
            display_name: String::new(),
            description: String::new(),
            fields: Vec::new(),
            template_ref: String::new(),
            template_text: String::new(),
            system_prompt: None,
            guardrails: Default::default(),
        }
    }

    #[tokio::test]
    async fn queued_responses_are_replayed_before_falling_back() {
        let service = ScriptedGenerationService::new();
        service.push_draft(Err(GenerationError::Timeout)).push_draft(Ok("first".to_string()));

        let schema = schema();
        let fields = BTreeMap::new();
        assert_eq!(
            service.draft(&schema, &fields, "rendered").await,
            Err(GenerationError::Timeout)
        );
        assert_eq!(service.draft(&schema, &fields, "rendered").await.as_deref(), Ok("first"));
        assert_eq!(service.draft(&schema, &fields, "rendered").await.as_deref(), Ok("rendered"));

        assert_eq!(service.draft_calls(), 3);
        assert_eq!(service.calls()[0], GenerationCall::Draft { doc_type_id: "nda".to_string() });
    }
}
