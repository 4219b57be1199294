use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::document::GeneratedDocument;
use crate::errors::DomainError;
use crate::flows::states::{SessionState, TransitionOutcome};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    System,
}

/// One recorded message. Turns are never edited after they are appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub index: usize,
    pub timestamp: DateTime<Utc>,
}

/// A coerced field value in canonical form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    Text(String),
    Date(NaiveDate),
    Number(Decimal),
    Choice(String),
}

impl TypedValue {
    /// Canonical rendering used by templates and comparisons.
    pub fn canonical(&self) -> String {
        match self {
            Self::Text(text) | Self::Choice(text) => text.clone(),
            Self::Date(date) => date.format("%Y-%m-%d").to_string(),
            Self::Number(number) => number.normalize().to_string(),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: TypedValue,
    /// Exact span of the source turn the value was read from.
    pub raw: String,
    pub source_turn_index: usize,
    pub confirmed: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub doc_type_id: String,
    state: SessionState,
    turns: Vec<Turn>,
    fields: BTreeMap<String, FieldValue>,
    pub violation_count: u32,
    pub extraction_attempts: u32,
    pub draft_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    history: Vec<TransitionOutcome>,
    document: Option<GeneratedDocument>,
}

impl Session {
    pub fn new(id: SessionId, doc_type_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            doc_type_id: doc_type_id.into(),
            state: SessionState::Init,
            turns: Vec::new(),
            fields: BTreeMap::new(),
            violation_count: 0,
            extraction_attempts: 0,
            draft_attempts: 0,
            created_at: now,
            last_activity: now,
            history: Vec::new(),
            document: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn history(&self) -> &[TransitionOutcome] {
        &self.history
    }

    pub fn document(&self) -> Option<&GeneratedDocument> {
        self.document.as_ref()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    pub fn append_turn(&mut self, role: TurnRole, text: impl Into<String>, now: DateTime<Utc>) -> usize {
        let index = self.turns.len();
        self.turns.push(Turn { role, text: text.into(), index, timestamp: now });
        self.last_activity = now;
        index
    }

    /// Applies an outcome produced by the flow engine for this session's
    /// current state.
    pub fn apply_transition(&mut self, outcome: TransitionOutcome) -> Result<(), DomainError> {
        if outcome.from != self.state {
            return Err(DomainError::StaleTransition { expected: outcome.from, actual: self.state });
        }
        self.state = outcome.to;
        self.history.push(outcome);
        Ok(())
    }

    /// Replaces unconfirmed values with a fresh provisional scan. Confirmed
    /// values are left alone.
    pub fn record_provisional(
        &mut self,
        values: BTreeMap<String, FieldValue>,
    ) -> Result<(), DomainError> {
        for (name, value) in &values {
            self.check_provenance(name, value)?;
        }
        self.fields.retain(|_, value| value.confirmed);
        for (name, mut value) in values {
            if self.fields.contains_key(&name) {
                continue;
            }
            value.confirmed = false;
            self.fields.insert(name, value);
        }
        Ok(())
    }

    /// Commits an extraction pass. Every value is checked against the turn
    /// log before anything is written, so a failure leaves `fields` untouched.
    pub fn commit_confirmed(
        &mut self,
        values: BTreeMap<String, FieldValue>,
    ) -> Result<(), DomainError> {
        for (name, value) in &values {
            if !value.confirmed {
                return Err(DomainError::InvariantViolation(format!(
                    "extraction produced unconfirmed value for `{name}`"
                )));
            }
            self.check_provenance(name, value)?;
        }
        self.fields = values;
        Ok(())
    }

    pub fn attach_document(&mut self, document: GeneratedDocument) -> Result<(), DomainError> {
        if self.document.is_some() {
            return Err(DomainError::InvariantViolation(
                "session already holds a generated document".to_string(),
            ));
        }
        self.document = Some(document);
        Ok(())
    }

    fn check_provenance(&self, name: &str, value: &FieldValue) -> Result<(), DomainError> {
        let supported = self
            .turns
            .get(value.source_turn_index)
            .filter(|turn| turn.role == TurnRole::User)
            .map(|turn| {
                !value.raw.trim().is_empty()
                    && turn.text.to_lowercase().contains(&value.raw.to_lowercase())
            })
            .unwrap_or(false);

        if supported {
            Ok(())
        } else {
            Err(DomainError::Provenance {
                field: name.to_string(),
                turn_index: value.source_turn_index,
            })
        }
    }
}
