use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use docwright_core::domain::schema::DocumentSchema;
use docwright_core::domain::session::Turn;
use docwright_core::errors::SessionError;
use docwright_core::extraction::{self, ExtractionResult};
use tracing::{debug, warn};

use crate::generation::{
    ConversationContext, GenerationService, StubGenerationService, COLLECTION_COMPLETE_MARKER,
};

const COMPLETION_FALLBACK_REPLY: &str =
    "I've collected all the information needed. Generating your document now...";

/// Result of one collection turn.
#[derive(Clone, Debug)]
pub struct CollectorReply {
    pub follow_up_text: String,
    pub ready_for_extraction: bool,
    /// Deterministic scan of the turns that were sent to the service.
    pub provisional: ExtractionResult,
}

/// Runs the collection dialogue. The collector owns the conversation
/// context; the generation service only phrases the next question.
pub struct FieldCollector {
    service: Arc<dyn GenerationService>,
    timeout: Duration,
}

impl FieldCollector {
    pub fn new(service: Arc<dyn GenerationService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// First assistant message of a session. A failing service never fails
    /// the session start; a prompt derived from the schema is used instead.
    pub async fn opening(&self, schema: Arc<DocumentSchema>, today: NaiveDate) -> String {
        let context = ConversationContext {
            missing: schema.required_fields().map(|spec| spec.name.clone()).collect(),
            schema: Arc::clone(&schema),
            turns: Vec::new(),
            collected: BTreeMap::new(),
            today,
        };

        match tokio::time::timeout(self.timeout, self.service.converse(&context)).await {
            Ok(Ok(reply)) => {
                let (text, _) = strip_marker(&reply.follow_up_text);
                if text.is_empty() {
                    StubGenerationService::opening(&schema)
                } else {
                    text
                }
            }
            Ok(Err(error)) => {
                warn!(
                    event_name = "collector.opening.fallback",
                    doc_type = %schema.doc_type_id,
                    error = %error,
                    "opening message unavailable, using schema prompt"
                );
                StubGenerationService::opening(&schema)
            }
            Err(_) => {
                warn!(
                    event_name = "collector.opening.fallback",
                    doc_type = %schema.doc_type_id,
                    error = "timeout",
                    "opening message unavailable, using schema prompt"
                );
                StubGenerationService::opening(&schema)
            }
        }
    }

    /// `turns` must already end with the new user message. Nothing is
    /// recorded here; on error the caller leaves the session as it was.
    pub async fn collect(
        &self,
        schema: Arc<DocumentSchema>,
        turns: &[Turn],
        today: NaiveDate,
    ) -> Result<CollectorReply, SessionError> {
        let provisional = extraction::extract(&schema, turns)
            .map_err(|error| SessionError::Internal(error.to_string()))?;
        let missing = provisional.outstanding_required(&schema);
        let collected = provisional
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value.value.canonical()))
            .collect::<BTreeMap<_, _>>();

        let context = ConversationContext {
            schema: Arc::clone(&schema),
            turns: turns.to_vec(),
            collected,
            missing: missing.clone(),
            today,
        };

        let reply = match tokio::time::timeout(self.timeout, self.service.converse(&context)).await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => return Err(SessionError::GenerationUnavailable(error.to_string())),
            Err(_) => {
                return Err(SessionError::GenerationUnavailable(format!(
                    "conversation reply timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        let (mut follow_up_text, marker_seen) = strip_marker(&reply.follow_up_text);
        let scan_complete = missing.is_empty();
        let ready_for_extraction = reply.ready_for_extraction || marker_seen || scan_complete;
        if follow_up_text.is_empty() {
            follow_up_text = COMPLETION_FALLBACK_REPLY.to_string();
        }

        debug!(
            event_name = "collector.turn.completed",
            doc_type = %schema.doc_type_id,
            service_hint = reply.ready_for_extraction,
            marker_seen,
            scan_complete,
            missing_count = missing.len(),
            "collection turn completed"
        );

        Ok(CollectorReply { follow_up_text, ready_for_extraction, provisional })
    }
}

/// Removes the completion marker from a reply and reports whether it was present.
pub fn strip_marker(reply: &str) -> (String, bool) {
    if reply.contains(COLLECTION_COMPLETE_MARKER) {
        (reply.replace(COLLECTION_COMPLETE_MARKER, "").trim().to_string(), true)
    } else {
        (reply.trim().to_string(), false)
    }
}
