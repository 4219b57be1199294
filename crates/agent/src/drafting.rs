use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use docwright_core::containment::FactSupport;
use docwright_core::domain::document::DraftFingerprint;
use docwright_core::domain::schema::DocumentSchema;
use docwright_core::domain::session::FieldValue;
use docwright_core::template;
use thiserror::Error;
use tracing::{info, warn};

use crate::generation::{GenerationError, GenerationService};

/// Rendered in place of an optional field the user never stated.
pub const NOT_SPECIFIED: &str = "Not specified";

const DRAFT_CACHE_CAPACITY: usize = 1_024;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DraftError {
    /// Fatal: the gate was asked to draft from incomplete or inconsistent input.
    #[error("draft precondition failed: {0}")]
    Precondition(String),
    #[error("draft contains unsupported facts: {}", .0.join(", "))]
    UnsupportedFacts(Vec<String>),
    #[error(transparent)]
    Service(#[from] GenerationError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DraftOutcome {
    pub text: String,
    pub fingerprint: DraftFingerprint,
    pub cached: bool,
}

/// Guards the drafting call: checks that every required field is confirmed,
/// renders the template, and rejects drafted text that asserts facts the
/// inputs do not support. Accepted drafts are cached by fingerprint so the
/// same inputs always produce the same bytes.
pub struct DrafterGate {
    service: Arc<dyn GenerationService>,
    timeout: Duration,
    accepted: Mutex<HashMap<DraftFingerprint, String>>,
}

impl DrafterGate {
    pub fn new(service: Arc<dyn GenerationService>, timeout: Duration) -> Self {
        Self { service, timeout, accepted: Mutex::new(HashMap::new()) }
    }

    pub fn check_preconditions(
        schema: &DocumentSchema,
        fields: &BTreeMap<String, FieldValue>,
    ) -> Result<(), DraftError> {
        let unconfirmed = schema
            .required_fields()
            .filter(|spec| !fields.get(&spec.name).is_some_and(|value| value.confirmed))
            .map(|spec| spec.name.clone())
            .collect::<Vec<_>>();
        if unconfirmed.is_empty() {
            Ok(())
        } else {
            Err(DraftError::Precondition(format!(
                "required fields are not confirmed: {}",
                unconfirmed.join(", ")
            )))
        }
    }

    /// Literal template substitution with canonical values.
    pub fn render(
        schema: &DocumentSchema,
        fields: &BTreeMap<String, FieldValue>,
    ) -> Result<String, DraftError> {
        let values = schema
            .fields
            .iter()
            .map(|spec| {
                let value = fields
                    .get(&spec.name)
                    .map(|value| value.value.canonical())
                    .unwrap_or_else(|| NOT_SPECIFIED.to_string());
                (spec.name.clone(), value)
            })
            .collect::<BTreeMap<_, _>>();

        template::render(&schema.template_text, &values)
            .map_err(|error| DraftError::Precondition(error.to_string()))
    }

    pub async fn draft(
        &self,
        schema: &DocumentSchema,
        fields: &BTreeMap<String, FieldValue>,
    ) -> Result<DraftOutcome, DraftError> {
        Self::check_preconditions(schema, fields)?;
        let rendered = Self::render(schema, fields)?;
        let fingerprint = DraftFingerprint::compute(schema, fields);

        if let Some(text) = self.cached(&fingerprint) {
            info!(
                event_name = "drafter.cache.hit",
                doc_type = %schema.doc_type_id,
                fingerprint = %fingerprint.0,
                "returning previously accepted draft"
            );
            return Ok(DraftOutcome { text, fingerprint, cached: true });
        }

        let text = match tokio::time::timeout(
            self.timeout,
            self.service.draft(schema, fields, &rendered),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(GenerationError::Timeout.into()),
        };

        let mut support = FactSupport::new(&schema.template_text, fields);
        support.absorb_text(&rendered);
        let unsupported = support.unsupported_facts(&text);
        if !unsupported.is_empty() {
            warn!(
                event_name = "drafter.containment.failed",
                doc_type = %schema.doc_type_id,
                unsupported_count = unsupported.len(),
                "draft asserts facts not present in confirmed fields or template"
            );
            return Err(DraftError::UnsupportedFacts(unsupported));
        }

        self.remember(fingerprint.clone(), text.clone());
        info!(
            event_name = "drafter.draft.accepted",
            doc_type = %schema.doc_type_id,
            fingerprint = %fingerprint.0,
            length = text.len(),
            "draft accepted"
        );
        Ok(DraftOutcome { text, fingerprint, cached: false })
    }

    fn cached(&self, fingerprint: &DraftFingerprint) -> Option<String> {
        let accepted = self.accepted.lock().unwrap_or_else(PoisonError::into_inner);
        accepted.get(fingerprint).cloned()
    }

    fn remember(&self, fingerprint: DraftFingerprint, text: String) {
        let mut accepted = self.accepted.lock().unwrap_or_else(PoisonError::into_inner);
        if accepted.len() >= DRAFT_CACHE_CAPACITY {
            accepted.clear();
        }
        accepted.entry(fingerprint).or_insert(text);
    }
}
