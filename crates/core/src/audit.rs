//! Audit trail for session decisions.
//!
//! Every guardrail refusal, state transition, extraction and draft outcome is
//! recorded as an [`AuditEvent`] scoped to one session. Events carry lengths,
//! rule ids and error kinds only; user message text never enters the trail.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::guardrail::GuardrailVerdict;
use crate::domain::session::{Session, SessionId};
use crate::errors::SessionError;
use crate::flows::{FlowTransitionError, TransitionOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Guardrail,
    Flow,
    Extraction,
    Drafting,
    Registry,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guardrail => "guardrail",
            Self::Flow => "flow",
            Self::Extraction => "extraction",
            Self::Drafting => "drafting",
            Self::Registry => "registry",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

/// Who is acting on which session, shared by every event of one operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub session_id: Option<SessionId>,
    pub doc_type: Option<String>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        session_id: Option<SessionId>,
        doc_type: Option<String>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { session_id, doc_type, correlation_id: correlation_id.into(), actor: actor.into() }
    }

    /// Context for one operation on `session` under a fresh correlation id.
    pub fn for_session(session: &Session, actor: impl Into<String>) -> Self {
        Self::new(
            Some(session.id.clone()),
            Some(session.doc_type_id.clone()),
            Uuid::new_v4().to_string(),
            actor,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub session_id: Option<SessionId>,
    pub doc_type: Option<String>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        context: &AuditContext,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            session_id: context.session_id.clone(),
            doc_type: context.doc_type.clone(),
            correlation_id: context.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: context.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn transition_applied(context: &AuditContext, outcome: &TransitionOutcome) -> Self {
        Self::new(context, "flow.transition_applied", AuditCategory::Flow, AuditOutcome::Success)
            .with_metadata("from", outcome.from.as_str())
            .with_metadata("to", outcome.to.as_str())
            .with_metadata("event", format!("{:?}", outcome.event))
    }

    pub fn transition_rejected(context: &AuditContext, error: &FlowTransitionError) -> Self {
        Self::new(context, "flow.transition_rejected", AuditCategory::Flow, AuditOutcome::Rejected)
            .with_metadata("error", error.to_string())
    }

    /// A refused message. Only the rule id and classification are kept.
    pub fn guardrail_refused(
        context: &AuditContext,
        verdict: &GuardrailVerdict,
        violation_count: u32,
    ) -> Self {
        Self::new(context, "guardrail.refused", AuditCategory::Guardrail, AuditOutcome::Rejected)
            .with_metadata("classification", verdict.classification.as_str())
            .with_metadata("rule_id", verdict.matched_rule_id.clone().unwrap_or_default())
            .with_metadata("violation_count", violation_count.to_string())
    }

    pub fn session_error(
        context: &AuditContext,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
        error: &SessionError,
    ) -> Self {
        Self::new(context, event_type, category, outcome)
            .with_metadata("error_kind", error.kind())
            .with_metadata("error", error.to_string())
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    fn lock(&self) -> MutexGuard<'_, Vec<AuditEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().clone()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.lock().iter().filter(|event| event.event_type == event_type).cloned().collect()
    }

    /// The trail of one session, in emission order.
    pub fn for_session(&self, session_id: &SessionId) -> Vec<AuditEvent> {
        self.lock()
            .iter()
            .filter(|event| event.session_id.as_ref() == Some(session_id))
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::audit::{
        AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    };
    use crate::domain::guardrail::{GuardrailClassification, GuardrailVerdict};
    use crate::domain::session::{Session, SessionId};
    use crate::errors::SessionError;

    #[test]
    fn session_context_scopes_events_to_one_session() {
        let sink = InMemoryAuditSink::default();
        let first = Session::new(SessionId("S-0042".to_owned()), "nda", Utc::now());
        let second = Session::new(SessionId("S-0043".to_owned()), "nda", Utc::now());

        let context = AuditContext::for_session(&first, "session-runtime");
        assert_eq!(context.doc_type.as_deref(), Some("nda"));
        assert!(!context.correlation_id.is_empty());

        sink.emit(AuditEvent::session_error(
            &context,
            "extraction.exhausted",
            AuditCategory::Extraction,
            AuditOutcome::Failed,
            &SessionError::ExtractionExhausted { attempts: 3, missing: vec!["party_b".to_owned()] },
        ));
        sink.emit(AuditEvent::new(
            &AuditContext::for_session(&second, "session-runtime"),
            "drafting.accepted",
            AuditCategory::Drafting,
            AuditOutcome::Success,
        ));

        let trail = sink.for_session(&first.id);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].correlation_id, context.correlation_id);
        assert_eq!(trail[0].metadata["error_kind"], "extraction_exhausted");
        assert_eq!(sink.events_of_type("drafting.accepted").len(), 1);
    }

    #[test]
    fn guardrail_refusal_records_rule_but_not_text() {
        let verdict = GuardrailVerdict {
            classification: GuardrailClassification::InjectionAttempt,
            matched_rule_id: Some("injection.override".to_owned()),
            reason: "attempts to override instructions".to_owned(),
        };
        let context = AuditContext::new(None, Some("nda".to_owned()), "req-7", "session-runtime");

        let event = AuditEvent::guardrail_refused(&context, &verdict, 2);

        assert_eq!(event.category, AuditCategory::Guardrail);
        assert_eq!(event.outcome.as_str(), "rejected");
        assert_eq!(event.metadata["rule_id"], "injection.override");
        assert_eq!(event.metadata["violation_count"], "2");
        assert!(!event.metadata.contains_key("message"));
    }
}
