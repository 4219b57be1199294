use std::sync::Arc;
use std::time::Duration;

use docwright_core::config::LlmConfig;
use docwright_core::domain::schema::DocumentSchema;
use docwright_core::domain::session::Turn;
use docwright_core::errors::SessionError;
use docwright_core::extraction::{self, ExtractionResult};
use tracing::{info, warn};

use crate::generation::{GenerationError, GenerationService};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 250, max_delay_ms: 4_000 }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Wraps the generation service's extraction call with bounded retry and
/// hands its candidates to the deterministic extractor.
pub struct FieldExtractor {
    service: Arc<dyn GenerationService>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl FieldExtractor {
    pub fn new(service: Arc<dyn GenerationService>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self { service, retry, timeout }
    }

    pub async fn extract(
        &self,
        schema: &DocumentSchema,
        turns: &[Turn],
    ) -> Result<ExtractionResult, SessionError> {
        let mut last_error = GenerationError::Timeout;

        for attempt in 0..=self.retry.max_retries {
            let call = tokio::time::timeout(self.timeout, self.service.extract(schema, turns));
            let error = match call.await {
                Ok(Ok(candidates)) => {
                    let result = extraction::extract_with_candidates(schema, turns, &candidates)
                        .map_err(|error| SessionError::Internal(error.to_string()))?;
                    info!(
                        event_name = "extractor.pass.completed",
                        doc_type = %schema.doc_type_id,
                        attempt,
                        candidate_count = candidates.len(),
                        value_count = result.values.len(),
                        missing_count = result.missing.len(),
                        validation_error_count = result.validation_errors.len(),
                        contradiction_count = result.resolved_contradictions.len(),
                        "extraction pass completed"
                    );
                    return Ok(result);
                }
                Ok(Err(error)) => error,
                Err(_) => GenerationError::Timeout,
            };

            warn!(
                event_name = "extractor.service.failed",
                doc_type = %schema.doc_type_id,
                attempt,
                max_retries = self.retry.max_retries,
                transient = error.is_transient(),
                error = %error,
                "extraction service call failed"
            );

            if !error.is_transient() {
                return Err(SessionError::ExtractionService {
                    attempts: attempt + 1,
                    message: error.to_string(),
                });
            }
            last_error = error;
            if attempt < self.retry.max_retries {
                tokio::time::sleep(self.retry.backoff(attempt)).await;
            }
        }

        Err(SessionError::ExtractionService {
            attempts: self.retry.max_retries + 1,
            message: last_error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use docwright_core::domain::schema::{DocumentSchema, FieldSpec, FieldType};
    use docwright_core::domain::session::{Turn, TurnRole};
    use docwright_core::errors::SessionError;
    use docwright_core::extraction::RawCandidate;

    use super::{FieldExtractor, RetryPolicy};
    use crate::generation::{GenerationError, ScriptedGenerationService};

    fn schema() -> DocumentSchema {
        DocumentSchema {
            doc_type_id: "nda".to_string(),
            display_name: String::new(),
            description: String::new(),
            fields: vec![
                FieldSpec::new("party_a", FieldType::String).with_label("Party A"),
                FieldSpec::new("purpose", FieldType::String),
            ],
            template_ref: String::new(),
            template_text: String::new(),
            system_prompt: None,
            guardrails: Default::default(),
        }
    }

    fn turns() -> Vec<Turn> {
        vec![Turn {
            role: TurnRole::User,
            text: "Party A is Acme Corp. We want to explore a joint venture".to_string(),
            index: 0,
            timestamp: Utc::now(),
        }]
    }

    fn policy() -> RetryPolicy {
        RetryPolicy { max_retries: 2, base_delay_ms: 100, max_delay_ms: 1_000 }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy { max_retries: 5, base_delay_ms: 250, max_delay_ms: 1_000 };
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_then_candidates_are_located() {
        let service = Arc::new(ScriptedGenerationService::new());
        service
            .push_extract(Err(GenerationError::Timeout))
            .push_extract(Err(GenerationError::Status { status: 503, body: String::new() }))
            .push_extract(Ok(vec![RawCandidate {
                field: "purpose".to_string(),
                value: "explore a joint venture".to_string(),
                turn_index: Some(0),
            }]));
        let extractor =
            FieldExtractor::new(Arc::clone(&service) as _, policy(), Duration::from_secs(5));

        let result = extractor.extract(&schema(), &turns()).await.expect("extraction");
        assert_eq!(result.values["party_a"].raw, "Acme Corp");
        assert_eq!(result.values["purpose"].raw, "explore a joint venture");
        assert!(result.missing.is_empty());
        assert_eq!(service.extract_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_extraction_service_error() {
        let service = Arc::new(ScriptedGenerationService::new());
        for _ in 0..3 {
            service.push_extract(Err(GenerationError::Transport("reset".to_string())));
        }
        let extractor =
            FieldExtractor::new(Arc::clone(&service) as _, policy(), Duration::from_secs(5));

        let error = extractor.extract(&schema(), &turns()).await.expect_err("exhausted");
        assert!(matches!(error, SessionError::ExtractionService { attempts: 3, .. }));
        assert_eq!(service.extract_calls(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let service = Arc::new(ScriptedGenerationService::new());
        service.push_extract(Err(GenerationError::Status {
            status: 401,
            body: "bad key".to_string(),
        }));
        let extractor =
            FieldExtractor::new(Arc::clone(&service) as _, policy(), Duration::from_secs(5));

        let error = extractor.extract(&schema(), &turns()).await.expect_err("permanent");
        assert!(matches!(error, SessionError::ExtractionService { attempts: 1, .. }));
        assert_eq!(service.extract_calls(), 1);
    }
}
