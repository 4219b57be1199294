use thiserror::Error;

use crate::domain::guardrail::GuardrailClassification;
use crate::domain::schema::SchemaError;
use crate::extraction::FieldValidationError;
use crate::flows::{FlowTransitionError, SessionState};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("transition expected session in {expected:?} but it is in {actual:?}")]
    StaleTransition { expected: SessionState, actual: SessionState },
    #[error("field `{field}` has no supporting statement in turn {turn_index}")]
    Provenance { field: String, turn_index: usize },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Everything a session operation can report to its caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("message refused by guardrail ({}): {reason}", classification.as_str())]
    GuardrailViolation {
        classification: GuardrailClassification,
        rule_id: Option<String>,
        reason: String,
        refusal: String,
        violation_count: u32,
    },
    #[error("session `{session_id}` is blocked after repeated guardrail violations")]
    SessionBlocked { session_id: String },
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: String, message: String },
    #[error("required fields are missing: {}", missing.join(", "))]
    MissingFields { missing: Vec<String>, validation_errors: Vec<FieldValidationError> },
    #[error("extraction service failed after {attempts} attempts: {message}")]
    ExtractionService { attempts: u32, message: String },
    #[error(
        "required fields still missing after {attempts} extraction attempts: {}",
        missing.join(", ")
    )]
    ExtractionExhausted { attempts: u32, missing: Vec<String> },
    #[error("drafted text failed validation: {}", unsupported.join(", "))]
    DraftValidation { unsupported: Vec<String>, attempts_remaining: u32 },
    #[error("session `{session_id}` has expired")]
    SessionExpired { session_id: String },
    #[error("session `{session_id}` was not found")]
    SessionNotFound { session_id: String },
    #[error("operation `{operation}` is not allowed while session is {}", state.as_str())]
    InvalidState { operation: &'static str, state: SessionState },
    #[error(transparent)]
    UnknownDocType(SchemaError),
    #[error("generation service unavailable: {0}")]
    GenerationUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Stable snake_case code for transports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GuardrailViolation { .. } => "guardrail_violation",
            Self::SessionBlocked { .. } => "session_blocked",
            Self::Validation { .. } => "validation_error",
            Self::MissingFields { .. } => "missing_fields",
            Self::ExtractionService { .. } => "extraction_service_error",
            Self::ExtractionExhausted { .. } => "extraction_exhausted",
            Self::DraftValidation { .. } => "draft_validation_error",
            Self::SessionExpired { .. } => "session_expired",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::UnknownDocType(_) => "unknown_doc_type",
            Self::GenerationUnavailable(_) => "generation_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Recoverable errors leave the session usable for another attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::GuardrailViolation { .. }
                | Self::Validation { .. }
                | Self::MissingFields { .. }
                | Self::DraftValidation { .. }
                | Self::GenerationUnavailable(_)
        )
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.to_string();
        match self {
            Self::SessionNotFound { .. } | Self::UnknownDocType(_) => {
                InterfaceError::NotFound { message, correlation_id }
            }
            Self::SessionExpired { .. } => InterfaceError::Gone { message, correlation_id },
            Self::SessionBlocked { .. } => InterfaceError::Locked { message, correlation_id },
            Self::GuardrailViolation { .. }
            | Self::Validation { .. }
            | Self::MissingFields { .. }
            | Self::ExtractionExhausted { .. }
            | Self::DraftValidation { .. } => {
                InterfaceError::Unprocessable { message, correlation_id }
            }
            Self::InvalidState { .. } => InterfaceError::Conflict { message, correlation_id },
            Self::ExtractionService { .. } | Self::GenerationUnavailable(_) => {
                InterfaceError::ServiceUnavailable { message, correlation_id }
            }
            Self::Internal(_) => InterfaceError::Internal { message, correlation_id },
        }
    }
}

impl From<DomainError> for SessionError {
    fn from(value: DomainError) -> Self {
        Self::Internal(value.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("gone: {message}")]
    Gone { message: String, correlation_id: String },
    #[error("locked: {message}")]
    Locked { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Gone { .. } => 410,
            Self::Locked { .. } => 423,
            Self::Conflict { .. } => 409,
            Self::Unprocessable { .. } => 422,
            Self::ServiceUnavailable { .. } => 503,
            Self::Internal { .. } => 500,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "The requested session or document type does not exist.",
            Self::Gone { .. } => "This session has expired. Please start a new one.",
            Self::Locked { .. } => {
                "This session has been blocked after repeated unsafe requests."
            }
            Self::Conflict { .. } => "That action is not available at this stage of the session.",
            Self::Unprocessable { .. } => "The request could not be processed. Check inputs and try again.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::NotFound { correlation_id, .. }
            | Self::Gone { correlation_id, .. }
            | Self::Locked { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}
