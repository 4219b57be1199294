pub mod audit;
pub mod config;
pub mod containment;
pub mod domain;
pub mod errors;
pub mod extraction;
pub mod flows;
pub mod schemas;
pub mod template;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use containment::FactSupport;
pub use domain::document::{DraftFingerprint, GeneratedDocument};
pub use domain::guardrail::{GuardrailClassification, GuardrailVerdict};
pub use domain::schema::{DocumentSchema, FieldSpec, FieldType, SchemaError, ValidationRule};
pub use domain::session::{FieldValue, Session, SessionId, Turn, TurnRole, TypedValue};
pub use errors::{DomainError, InterfaceError, SessionError};
pub use extraction::{ExtractionResult, FieldValidationError, RawCandidate};
pub use flows::{SessionEvent, SessionState};
pub use schemas::{DocTypeSummary, InMemorySchemaSource, SchemaSource, YamlSchemaDirectory};
