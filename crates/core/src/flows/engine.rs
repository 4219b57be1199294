use thiserror::Error;

use crate::audit::{AuditContext, AuditEvent, AuditSink};
use crate::flows::states::{FlowAction, FlowContext, SessionEvent, SessionState, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> SessionState;
    fn transition(
        &self,
        current: &SessionState,
        event: &SessionEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The document-collection lifecycle:
/// `Init -> Collecting -> ReadyForExtraction -> Extracting -> Drafting -> Complete`,
/// with `Blocked` reachable from any active state and `Failed`/`Expired` terminal.
#[derive(Clone, Debug, Default)]
pub struct DocumentSessionFlow;

impl FlowDefinition for DocumentSessionFlow {
    fn initial_state(&self) -> SessionState {
        SessionState::Init
    }

    fn transition(
        &self,
        current: &SessionState,
        event: &SessionEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_document_session(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> SessionState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &SessionState,
        event: &SessionEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &SessionState,
        event: &SessionEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => sink.emit(AuditEvent::transition_applied(audit, outcome)),
            Err(error) => sink.emit(AuditEvent::transition_rejected(audit, error)),
        }
        result
    }
}

impl Default for FlowEngine<DocumentSessionFlow> {
    fn default() -> Self {
        Self::new(DocumentSessionFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields before transition from {state:?}: {missing_fields:?}")]
    MissingRequiredFields { state: SessionState, missing_fields: Vec<String> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: SessionState, event: SessionEvent },
}

fn transition_document_session(
    current: &SessionState,
    event: &SessionEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        DeliverDocument, EvictSession, InvokeDrafter, PromptForMissingFields, RefuseFurtherChat,
        RunExtraction,
    };
    use SessionEvent::{
        CollectionStarted, DraftAccepted, DraftFailed, DraftRejected, ExtractionFailed,
        ExtractionRequested, ExtractionSucceeded, FieldsMissing, ReadinessSignalled, TtlElapsed,
        ViolationThresholdReached,
    };
    use SessionState::{
        Blocked, Collecting, Complete, Drafting, Expired, Extracting, Failed, Init,
        ReadyForExtraction,
    };

    let invalid = || FlowTransitionError::InvalidTransition { state: *current, event: event.clone() };

    let (to, actions) = match (current, event) {
        (Init, CollectionStarted) => (Collecting, vec![PromptForMissingFields]),
        (Collecting, ReadinessSignalled) => (ReadyForExtraction, Vec::new()),
        (ReadyForExtraction, ExtractionRequested) => (Extracting, vec![RunExtraction]),
        (Extracting, FieldsMissing) => {
            if context.missing_required_fields.is_empty() {
                return Err(invalid());
            }
            (Collecting, vec![PromptForMissingFields])
        }
        (Extracting, ExtractionSucceeded) => {
            if !context.missing_required_fields.is_empty() {
                return Err(FlowTransitionError::MissingRequiredFields {
                    state: *current,
                    missing_fields: context.missing_required_fields.clone(),
                });
            }
            (Drafting, vec![InvokeDrafter])
        }
        (Extracting, ExtractionFailed) => (Failed, Vec::new()),
        (Drafting, DraftAccepted) => (Complete, vec![DeliverDocument]),
        (Drafting, DraftRejected) => (Drafting, vec![InvokeDrafter]),
        (Drafting, DraftFailed) => (Failed, Vec::new()),
        (state, ViolationThresholdReached) if state.is_active() => {
            (Blocked, vec![RefuseFurtherChat])
        }
        (Expired, TtlElapsed) => return Err(invalid()),
        (_, TtlElapsed) => (Expired, vec![EvictSession]),
        _ => return Err(invalid()),
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}

/// Whether `to` is a legal successor of `from` in the session graph.
pub fn is_legal_edge(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    match (from, to) {
        (Init, Collecting)
        | (Collecting, ReadyForExtraction)
        | (ReadyForExtraction, Extracting)
        | (Extracting, Collecting)
        | (Extracting, Drafting)
        | (Extracting, Failed)
        | (Drafting, Drafting)
        | (Drafting, Complete)
        | (Drafting, Failed) => true,
        (state, Blocked) => state.is_active(),
        (state, Expired) => state != Expired,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::session::SessionId;
    use crate::flows::engine::{is_legal_edge, FlowEngine, FlowTransitionError};
    use crate::flows::states::{FlowAction, FlowContext, SessionEvent, SessionState};

    const ALL_STATES: [SessionState; 9] = [
        SessionState::Init,
        SessionState::Collecting,
        SessionState::ReadyForExtraction,
        SessionState::Extracting,
        SessionState::Drafting,
        SessionState::Complete,
        SessionState::Blocked,
        SessionState::Failed,
        SessionState::Expired,
    ];

    const ALL_EVENTS: [SessionEvent; 11] = [
        SessionEvent::CollectionStarted,
        SessionEvent::ReadinessSignalled,
        SessionEvent::ExtractionRequested,
        SessionEvent::FieldsMissing,
        SessionEvent::ExtractionSucceeded,
        SessionEvent::ExtractionFailed,
        SessionEvent::DraftAccepted,
        SessionEvent::DraftRejected,
        SessionEvent::DraftFailed,
        SessionEvent::ViolationThresholdReached,
        SessionEvent::TtlElapsed,
    ];

    #[test]
    fn happy_path_walks_every_intermediate_state() {
        let engine = FlowEngine::default();
        let context = FlowContext::default();
        let mut state = engine.initial_state();
        let mut visited = vec![state];

        for event in [
            SessionEvent::CollectionStarted,
            SessionEvent::ReadinessSignalled,
            SessionEvent::ExtractionRequested,
            SessionEvent::ExtractionSucceeded,
            SessionEvent::DraftAccepted,
        ] {
            state = engine.apply(&state, &event, &context).expect("happy path step").to;
            visited.push(state);
        }

        assert_eq!(
            visited,
            vec![
                SessionState::Init,
                SessionState::Collecting,
                SessionState::ReadyForExtraction,
                SessionState::Extracting,
                SessionState::Drafting,
                SessionState::Complete,
            ]
        );
    }

    #[test]
    fn missing_fields_loop_back_to_collecting() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(
                &SessionState::Extracting,
                &SessionEvent::FieldsMissing,
                &FlowContext::with_missing(vec!["term_years".to_owned()]),
            )
            .expect("extracting -> collecting");

        assert_eq!(outcome.to, SessionState::Collecting);
        assert_eq!(outcome.actions, vec![FlowAction::PromptForMissingFields]);
    }

    #[test]
    fn extraction_success_with_missing_fields_is_rejected() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(
                &SessionState::Extracting,
                &SessionEvent::ExtractionSucceeded,
                &FlowContext::with_missing(vec!["party_b".to_owned()]),
            )
            .expect_err("cannot draft with missing fields");

        assert!(matches!(error, FlowTransitionError::MissingRequiredFields { .. }));
    }

    #[test]
    fn collecting_cannot_jump_to_extracting_or_drafting() {
        let engine = FlowEngine::default();
        let context = FlowContext::default();

        for event in [SessionEvent::ExtractionRequested, SessionEvent::ExtractionSucceeded] {
            let error = engine
                .apply(&SessionState::Collecting, &event, &context)
                .expect_err("collecting must pass through ready_for_extraction");
            assert!(matches!(error, FlowTransitionError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn blocked_is_reachable_only_from_active_states() {
        let engine = FlowEngine::default();
        let context = FlowContext::default();

        for state in ALL_STATES {
            let result = engine.apply(&state, &SessionEvent::ViolationThresholdReached, &context);
            assert_eq!(result.is_ok(), state.is_active(), "state {state:?}");
        }
    }

    #[test]
    fn every_produced_transition_is_a_legal_edge() {
        let engine = FlowEngine::default();
        let contexts = [FlowContext::default(), FlowContext::with_missing(vec!["x".to_owned()])];

        for state in ALL_STATES {
            for event in &ALL_EVENTS {
                for context in &contexts {
                    if let Ok(outcome) = engine.apply(&state, event, context) {
                        assert!(
                            is_legal_edge(outcome.from, outcome.to),
                            "{:?} -> {:?} via {event:?}",
                            outcome.from,
                            outcome.to
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn terminal_states_only_accept_expiry() {
        let engine = FlowEngine::default();
        let context = FlowContext::default();

        for state in [SessionState::Complete, SessionState::Failed] {
            for event in &ALL_EVENTS {
                let result = engine.apply(&state, event, &context);
                if *event == SessionEvent::TtlElapsed {
                    assert_eq!(result.expect("expiry").to, SessionState::Expired);
                } else {
                    assert!(result.is_err(), "{state:?} accepted {event:?}");
                }
            }
        }

        assert!(engine
            .apply(&SessionState::Expired, &SessionEvent::TtlElapsed, &context)
            .is_err());
    }

    #[test]
    fn transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .apply_with_audit(
                &SessionState::Init,
                &SessionEvent::CollectionStarted,
                &FlowContext::default(),
                &sink,
                &AuditContext::new(
                    Some(SessionId("S-0009".to_owned())),
                    Some("nda".to_owned()),
                    "req-42",
                    "session-runtime",
                ),
            )
            .expect("transition should succeed");

        let rejected = engine.apply_with_audit(
            &SessionState::Init,
            &SessionEvent::DraftAccepted,
            &FlowContext::default(),
            &sink,
            &AuditContext::new(None, None, "req-43", "session-runtime"),
        );
        assert!(rejected.is_err());

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("collecting"));
        assert_eq!(events[1].event_type, "flow.transition_rejected");
    }
}
