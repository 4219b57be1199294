use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use docwright_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use docwright_core::config::AppConfig;
use docwright_core::domain::document::GeneratedDocument;
use docwright_core::domain::schema::DocumentSchema;
use docwright_core::domain::session::{FieldValue, Session, SessionId, Turn, TurnRole};
use docwright_core::errors::SessionError;
use docwright_core::extraction::{ContradictionResolution, FieldValidationError};
use docwright_core::flows::{
    DocumentSessionFlow, FlowContext, FlowEngine, SessionEvent, SessionState,
};
use docwright_core::schemas::{DocTypeSummary, SchemaSource};
use serde::Serialize;
use tracing::{info, warn};

use crate::conversation::FieldCollector;
use crate::drafting::{DraftError, DrafterGate};
use crate::extractor::{FieldExtractor, RetryPolicy};
use crate::generation::GenerationService;
use crate::guardrails::GuardrailEngine;
use crate::registry::SessionRegistry;

const ACTOR: &str = "session-runtime";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub violation_threshold: u32,
    pub max_extraction_attempts: u32,
    pub max_draft_attempts: u32,
    pub min_message_chars: usize,
    pub max_message_chars: usize,
    pub session_ttl: Duration,
    pub generation_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            violation_threshold: config.session.violation_threshold,
            max_extraction_attempts: config.session.max_extraction_attempts,
            max_draft_attempts: config.session.max_draft_attempts,
            min_message_chars: config.session.min_message_chars,
            max_message_chars: config.session.max_message_chars,
            session_ttl: Duration::from_secs(config.session.ttl_secs),
            generation_timeout: Duration::from_secs(config.llm.timeout_secs),
            retry: RetryPolicy::from_config(&config.llm),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StartResponse {
    pub session_id: SessionId,
    pub doc_type: String,
    pub display_name: String,
    pub opening_message: String,
    pub total_fields: usize,
    pub state: SessionState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatResponse {
    pub session_id: SessionId,
    pub reply: String,
    pub state: SessionState,
    pub ready_for_extraction: bool,
    pub missing_fields: Vec<String>,
    pub fields_collected: usize,
    pub total_fields: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GenerateResponse {
    pub session_id: SessionId,
    pub doc_type: String,
    pub state: SessionState,
    pub document: GeneratedDocument,
    pub resolved_contradictions: Vec<ContradictionResolution>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    pub session_id: SessionId,
    pub doc_type: String,
    pub state: SessionState,
    pub fields_so_far: BTreeMap<String, FieldValue>,
    pub turn_count: usize,
    pub violation_count: u32,
    pub total_fields: usize,
    pub fields_collected: usize,
    pub missing_fields: Vec<String>,
    pub document: Option<GeneratedDocument>,
}

/// Session orchestration: every public operation runs under the session's
/// exclusive lock and moves state only through the flow engine.
pub struct AgentRuntime {
    schemas: Arc<dyn SchemaSource>,
    registry: Arc<SessionRegistry>,
    guardrails: GuardrailEngine,
    collector: FieldCollector,
    extractor: FieldExtractor,
    drafter: DrafterGate,
    flow: FlowEngine<DocumentSessionFlow>,
    audit: Arc<dyn AuditSink>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        schemas: Arc<dyn SchemaSource>,
        service: Arc<dyn GenerationService>,
        audit: Arc<dyn AuditSink>,
        settings: RuntimeSettings,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(settings.session_ttl, Arc::clone(&audit)));
        Self {
            schemas,
            registry,
            guardrails: GuardrailEngine::builtin(
                settings.min_message_chars,
                settings.max_message_chars,
            ),
            collector: FieldCollector::new(Arc::clone(&service), settings.generation_timeout),
            extractor: FieldExtractor::new(
                Arc::clone(&service),
                settings.retry,
                settings.generation_timeout,
            ),
            drafter: DrafterGate::new(service, settings.generation_timeout),
            flow: FlowEngine::default(),
            audit,
            settings,
        }
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn doc_types(&self) -> Vec<DocTypeSummary> {
        self.schemas.list()
    }

    pub async fn start(&self, doc_type_id: &str) -> Result<StartResponse, SessionError> {
        let schema = self.schemas.get(doc_type_id).map_err(SessionError::UnknownDocType)?;
        let now = Utc::now();
        let mut session = Session::new(SessionId::generate(), doc_type_id, now);
        let audit = self.audit_context(&session);

        self.transition(
            &mut session,
            SessionEvent::CollectionStarted,
            FlowContext::default(),
            &audit,
        )?;
        let opening = self.collector.opening(Arc::clone(&schema), now.date_naive()).await;
        session.append_turn(TurnRole::System, opening.clone(), Utc::now());

        let response = StartResponse {
            session_id: session.id.clone(),
            doc_type: schema.doc_type_id.clone(),
            display_name: schema.display_name().to_string(),
            opening_message: opening,
            total_fields: schema.fields.len(),
            state: session.state(),
        };
        self.registry.create(session);

        info!(
            event_name = "session.started",
            session_id = %response.session_id,
            doc_type = %response.doc_type,
            correlation_id = %audit.correlation_id,
            "session started"
        );
        Ok(response)
    }

    pub async fn chat(
        &self,
        session_id: &SessionId,
        message: &str,
    ) -> Result<ChatResponse, SessionError> {
        let mut session = self.registry.checkout(session_id, Utc::now()).await?;
        let audit = self.audit_context(&session);

        match session.state() {
            SessionState::Blocked => {
                return Err(SessionError::SessionBlocked { session_id: session_id.to_string() })
            }
            state if !state.accepts_chat() => {
                return Err(SessionError::InvalidState { operation: "chat", state })
            }
            _ => {}
        }

        let schema = self.schema_for(&session)?;
        self.guardrails.check_length(message)?;

        let verdict = self
            .guardrails
            .for_document(&schema.doc_type_id, &schema.guardrails)
            .classify(message);
        if !verdict.is_safe() {
            session.violation_count += 1;
            session.touch(Utc::now());
            self.audit.emit(AuditEvent::guardrail_refused(
                &audit,
                &verdict,
                session.violation_count,
            ));
            warn!(
                event_name = "guardrail.refused",
                session_id = %session.id,
                doc_type = %session.doc_type_id,
                correlation_id = %audit.correlation_id,
                classification = verdict.classification.as_str(),
                rule_id = verdict.matched_rule_id.as_deref().unwrap_or(""),
                violation_count = session.violation_count,
                message_chars = message.chars().count(),
                "message refused by guardrail"
            );

            if session.violation_count >= self.settings.violation_threshold {
                self.transition(
                    &mut session,
                    SessionEvent::ViolationThresholdReached,
                    FlowContext::default(),
                    &audit,
                )?;
                warn!(
                    event_name = "session.blocked",
                    session_id = %session.id,
                    correlation_id = %audit.correlation_id,
                    violation_count = session.violation_count,
                    "session blocked after repeated guardrail violations"
                );
            }

            return Err(SessionError::GuardrailViolation {
                classification: verdict.classification,
                rule_id: verdict.matched_rule_id.clone(),
                reason: verdict.reason.clone(),
                refusal: verdict.refusal_message().unwrap_or_default().to_string(),
                violation_count: session.violation_count,
            });
        }

        let now = Utc::now();
        let mut pending = session.turns().to_vec();
        pending.push(Turn {
            role: TurnRole::User,
            text: message.to_string(),
            index: pending.len(),
            timestamp: now,
        });
        let collected =
            self.collector.collect(Arc::clone(&schema), &pending, now.date_naive()).await?;

        session.append_turn(TurnRole::User, message, now);
        session.append_turn(TurnRole::System, collected.follow_up_text.clone(), Utc::now());
        session.record_provisional(collected.provisional.values.clone())?;

        if collected.ready_for_extraction && session.state() == SessionState::Collecting {
            self.transition(
                &mut session,
                SessionEvent::ReadinessSignalled,
                FlowContext::default(),
                &audit,
            )?;
        }

        let missing_fields = collected.provisional.outstanding_required(&schema);
        info!(
            event_name = "session.chat.completed",
            session_id = %session.id,
            doc_type = %session.doc_type_id,
            correlation_id = %audit.correlation_id,
            state = session.state().as_str(),
            message_chars = message.chars().count(),
            missing_count = missing_fields.len(),
            "chat turn completed"
        );

        Ok(ChatResponse {
            session_id: session.id.clone(),
            reply: collected.follow_up_text,
            state: session.state(),
            ready_for_extraction: session.state() == SessionState::ReadyForExtraction,
            missing_fields,
            fields_collected: session.fields().len(),
            total_fields: schema.fields.len(),
        })
    }

    pub async fn generate(&self, session_id: &SessionId) -> Result<GenerateResponse, SessionError> {
        let mut session = self.registry.checkout(session_id, Utc::now()).await?;
        let audit = self.audit_context(&session);
        session.touch(Utc::now());

        let schema = self.schema_for(&session)?;
        let resolved_contradictions = match session.state() {
            SessionState::ReadyForExtraction => {
                self.run_extraction(&mut session, &schema, &audit).await?
            }
            SessionState::Drafting => Vec::new(),
            SessionState::Blocked => {
                return Err(SessionError::SessionBlocked { session_id: session_id.to_string() })
            }
            state => return Err(SessionError::InvalidState { operation: "generate", state }),
        };

        let document = self.run_drafting(&mut session, &schema, &audit).await?;
        Ok(GenerateResponse {
            session_id: session.id.clone(),
            doc_type: session.doc_type_id.clone(),
            state: session.state(),
            document,
            resolved_contradictions,
        })
    }

    pub async fn status(&self, session_id: &SessionId) -> Result<StatusResponse, SessionError> {
        let session = self.registry.checkout(session_id, Utc::now()).await?;
        let schema = self.schemas.get(&session.doc_type_id).ok();

        let (total_fields, missing_fields) = match &schema {
            Some(schema) => (
                schema.fields.len(),
                schema
                    .required_fields()
                    .filter(|spec| !session.fields().contains_key(&spec.name))
                    .map(|spec| spec.name.clone())
                    .collect(),
            ),
            None => (0, Vec::new()),
        };

        Ok(StatusResponse {
            session_id: session.id.clone(),
            doc_type: session.doc_type_id.clone(),
            state: session.state(),
            fields_so_far: session.fields().clone(),
            turn_count: session.turns().len(),
            violation_count: session.violation_count,
            total_fields,
            fields_collected: session.fields().len(),
            missing_fields,
            document: session.document().cloned(),
        })
    }

    async fn run_extraction(
        &self,
        session: &mut Session,
        schema: &DocumentSchema,
        audit: &AuditContext,
    ) -> Result<Vec<ContradictionResolution>, SessionError> {
        self.transition(
            session,
            SessionEvent::ExtractionRequested,
            FlowContext::default(),
            audit,
        )?;
        session.extraction_attempts += 1;
        let attempt = session.extraction_attempts;

        let result = match self.extractor.extract(schema, session.turns()).await {
            Ok(result) => result,
            Err(error) => {
                self.fail_extraction(session, audit, "extraction.failed", &error)?;
                return Err(error);
            }
        };

        let outstanding = result.outstanding_required(schema);
        if !outstanding.is_empty() {
            let validation_errors: Vec<FieldValidationError> = result.validation_errors.clone();
            if attempt >= self.settings.max_extraction_attempts {
                let error =
                    SessionError::ExtractionExhausted { attempts: attempt, missing: outstanding };
                self.fail_extraction(session, audit, "extraction.exhausted", &error)?;
                return Err(error);
            }

            self.transition(
                session,
                SessionEvent::FieldsMissing,
                FlowContext::with_missing(outstanding.clone()),
                audit,
            )?;
            session.record_provisional(result.values)?;
            self.audit.emit(
                AuditEvent::new(
                    audit,
                    "extraction.fields_missing",
                    AuditCategory::Extraction,
                    AuditOutcome::Rejected,
                )
                .with_metadata("missing", outstanding.join(","))
                .with_metadata("attempt", attempt.to_string()),
            );
            return Err(SessionError::MissingFields { missing: outstanding, validation_errors });
        }

        if let Err(error) = session.commit_confirmed(result.values) {
            let error = SessionError::from(error);
            self.fail_extraction(session, audit, "extraction.failed", &error)?;
            return Err(error);
        }

        for resolution in &result.resolved_contradictions {
            info!(
                event_name = "extraction.contradiction.resolved",
                session_id = %session.id,
                field = %resolution.field,
                chosen_turn = resolution.chosen.turn_index,
                superseded = resolution.superseded.len(),
                "latest statement wins"
            );
        }
        self.audit.emit(
            AuditEvent::new(
                audit,
                "extraction.succeeded",
                AuditCategory::Extraction,
                AuditOutcome::Success,
            )
            .with_metadata("fields", session.fields().len().to_string())
            .with_metadata("contradictions", result.resolved_contradictions.len().to_string()),
        );
        self.transition(
            session,
            SessionEvent::ExtractionSucceeded,
            FlowContext::default(),
            audit,
        )?;
        Ok(result.resolved_contradictions)
    }

    async fn run_drafting(
        &self,
        session: &mut Session,
        schema: &DocumentSchema,
        audit: &AuditContext,
    ) -> Result<GeneratedDocument, SessionError> {
        session.draft_attempts += 1;
        let attempts_remaining =
            self.settings.max_draft_attempts.saturating_sub(session.draft_attempts);

        let error = match self.drafter.draft(schema, session.fields()).await {
            Ok(outcome) => {
                let document = GeneratedDocument {
                    text: outcome.text,
                    fields_snapshot: session.fields().clone(),
                    doc_type_id: session.doc_type_id.clone(),
                    session_id: session.id.clone(),
                    generated_at: Utc::now(),
                };
                session.attach_document(document.clone())?;
                self.audit.emit(
                    AuditEvent::new(
                        audit,
                        "draft.accepted",
                        AuditCategory::Drafting,
                        AuditOutcome::Success,
                    )
                    .with_metadata("fingerprint", outcome.fingerprint.0)
                    .with_metadata("cached", outcome.cached.to_string()),
                );
                self.transition(
                    session,
                    SessionEvent::DraftAccepted,
                    FlowContext::default(),
                    audit,
                )?;
                info!(
                    event_name = "session.completed",
                    session_id = %session.id,
                    doc_type = %session.doc_type_id,
                    correlation_id = %audit.correlation_id,
                    "document generated"
                );
                return Ok(document);
            }
            Err(error) => error,
        };

        match error {
            DraftError::Precondition(message) => {
                let error = SessionError::Internal(message);
                self.audit_outcome(
                    audit,
                    "draft.precondition_failed",
                    AuditCategory::Drafting,
                    AuditOutcome::Failed,
                    &error,
                );
                self.transition(session, SessionEvent::DraftFailed, FlowContext::default(), audit)?;
                Err(error)
            }
            DraftError::UnsupportedFacts(unsupported) => {
                let error = SessionError::DraftValidation { unsupported, attempts_remaining };
                self.audit_outcome(
                    audit,
                    "draft.rejected",
                    AuditCategory::Drafting,
                    AuditOutcome::Rejected,
                    &error,
                );
                let event = if attempts_remaining == 0 {
                    SessionEvent::DraftFailed
                } else {
                    SessionEvent::DraftRejected
                };
                self.transition(session, event, FlowContext::default(), audit)?;
                Err(error)
            }
            DraftError::Service(service_error) => {
                let error = SessionError::GenerationUnavailable(service_error.to_string());
                self.audit_outcome(
                    audit,
                    "draft.service_failed",
                    AuditCategory::Drafting,
                    AuditOutcome::Failed,
                    &error,
                );
                if attempts_remaining == 0 {
                    self.transition(
                        session,
                        SessionEvent::DraftFailed,
                        FlowContext::default(),
                        audit,
                    )?;
                }
                Err(error)
            }
        }
    }

    fn fail_extraction(
        &self,
        session: &mut Session,
        audit: &AuditContext,
        event_type: &str,
        error: &SessionError,
    ) -> Result<(), SessionError> {
        self.audit_outcome(audit, event_type, AuditCategory::Extraction, AuditOutcome::Failed, error);
        self.transition(session, SessionEvent::ExtractionFailed, FlowContext::default(), audit)
    }

    fn schema_for(&self, session: &Session) -> Result<Arc<DocumentSchema>, SessionError> {
        self.schemas.get(&session.doc_type_id).map_err(SessionError::UnknownDocType)
    }

    fn audit_context(&self, session: &Session) -> AuditContext {
        AuditContext::for_session(session, ACTOR)
    }

    fn audit_outcome(
        &self,
        audit: &AuditContext,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        error: &SessionError,
    ) {
        self.audit.emit(AuditEvent::session_error(audit, event_type, category, outcome, error));
    }

    fn transition(
        &self,
        session: &mut Session,
        event: SessionEvent,
        context: FlowContext,
        audit: &AuditContext,
    ) -> Result<(), SessionError> {
        let outcome = self
            .flow
            .apply_with_audit(&session.state(), &event, &context, self.audit.as_ref(), audit)
            .map_err(|error| SessionError::Internal(error.to_string()))?;
        info!(
            event_name = "session.transition",
            session_id = %session.id,
            correlation_id = %audit.correlation_id,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            "session state changed"
        );
        session.apply_transition(outcome)?;
        Ok(())
    }
}
