use docwright_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Forwards audit events to the `tracing` subscriber under the `audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let session_id = event.session_id.as_ref().map(ToString::to_string).unwrap_or_default();
        let doc_type = event.doc_type.clone().unwrap_or_default();
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => info!(
                target: "audit",
                event_name = %event.event_type,
                event_id = %event.event_id,
                category = event.category.as_str(),
                outcome = event.outcome.as_str(),
                correlation_id = %event.correlation_id,
                session_id = %session_id,
                doc_type = %doc_type,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                target: "audit",
                event_name = %event.event_type,
                event_id = %event.event_id,
                category = event.category.as_str(),
                outcome = event.outcome.as_str(),
                correlation_id = %event.correlation_id,
                session_id = %session_id,
                doc_type = %doc_type,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}
