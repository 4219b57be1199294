//! Deterministic field extraction.
//!
//! Extraction reads only user turns. A value is accepted only when its exact
//! span can be found in the turn it is attributed to, so the generation
//! service can propose candidates but never introduce facts. When a field is
//! stated more than once the most recent statement wins and the superseded
//! ones are reported.

pub mod coercion;
pub mod scanner;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::schema::{DocumentSchema, FieldSpec, SchemaError};
use crate::domain::session::{FieldValue, Turn};

pub use coercion::{coerce, validate, CoercionError};
pub use scanner::{locate, Statement, StatementScanner};

/// A value proposed by the generation service for one field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub field: String,
    pub value: String,
    #[serde(default)]
    pub turn_index: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValidationError {
    pub field: String,
    pub value: String,
    pub source_turn_index: Option<usize>,
    pub message: String,
}

/// One side of a resolved contradiction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStatement {
    pub value: String,
    pub raw: String,
    pub turn_index: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContradictionResolution {
    pub field: String,
    pub chosen: ResolvedStatement,
    pub superseded: Vec<ResolvedStatement>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub values: BTreeMap<String, FieldValue>,
    pub missing: BTreeSet<String>,
    pub validation_errors: Vec<FieldValidationError>,
    pub resolved_contradictions: Vec<ContradictionResolution>,
}

impl ExtractionResult {
    /// Required fields that are absent or failed validation, in schema order.
    pub fn outstanding_required(&self, schema: &DocumentSchema) -> Vec<String> {
        schema
            .required_fields()
            .filter(|spec| {
                self.missing.contains(&spec.name)
                    || self.validation_errors.iter().any(|error| error.field == spec.name)
            })
            .map(|spec| spec.name.clone())
            .collect()
    }

    pub fn is_complete(&self, schema: &DocumentSchema) -> bool {
        self.outstanding_required(schema).is_empty()
    }
}

/// Extracts every schema field from the user turns alone.
pub fn extract(schema: &DocumentSchema, turns: &[Turn]) -> Result<ExtractionResult, SchemaError> {
    extract_with_candidates(schema, turns, &[])
}

/// Extracts fields from scanned statements plus service-proposed candidates.
/// Candidates whose value cannot be located in a user turn are reported as
/// validation errors and never become field values.
pub fn extract_with_candidates(
    schema: &DocumentSchema,
    turns: &[Turn],
    candidates: &[RawCandidate],
) -> Result<ExtractionResult, SchemaError> {
    let scanner = StatementScanner::for_schema(schema)?;
    let mut result = ExtractionResult::default();

    for spec in &schema.fields {
        let mut statements = scanner.scan_field(&spec.name, turns);

        for candidate in candidates.iter().filter(|candidate| candidate.field == spec.name) {
            match locate(spec, &candidate.value, candidate.turn_index, turns) {
                // A located proposal replaces a longer scanned span it overlaps.
                Some(statement) => {
                    match statements.iter().position(|existing| existing.overlaps(&statement)) {
                        Some(position) if statement.raw.len() < statements[position].raw.len() => {
                            statements[position] = statement;
                        }
                        Some(_) => {}
                        None => statements.push(statement),
                    }
                }
                None if statements.is_empty() => {
                    result.validation_errors.push(FieldValidationError {
                        field: spec.name.clone(),
                        value: candidate.value.clone(),
                        source_turn_index: candidate.turn_index,
                        message: "value is not stated in any user message".to_string(),
                    });
                }
                None => {}
            }
        }
        statements.sort_by_key(|statement| (statement.turn_index, statement.offset));

        resolve_field(spec, &statements, &mut result);
    }

    // A located statement supersedes an unlocatable proposal for the same field.
    let resolved: BTreeSet<String> = result.values.keys().cloned().collect();
    result.validation_errors.retain(|error| !resolved.contains(&error.field));

    Ok(result)
}

fn resolve_field(spec: &FieldSpec, statements: &[Statement], result: &mut ExtractionResult) {
    let Some(latest) = statements.last() else {
        let unlocated = result.validation_errors.iter().any(|error| error.field == spec.name);
        if spec.required && !unlocated {
            result.missing.insert(spec.name.clone());
        }
        return;
    };

    let chosen_value = comparable(spec, &latest.raw);
    let mut superseded: Vec<ResolvedStatement> = Vec::new();
    for earlier in &statements[..statements.len() - 1] {
        let value = comparable(spec, &earlier.raw);
        let seen = superseded.iter().any(|entry| same_value(&entry.value, &value));
        if !same_value(&value, &chosen_value) && !seen {
            superseded.push(ResolvedStatement {
                value,
                raw: earlier.raw.clone(),
                turn_index: earlier.turn_index,
            });
        }
    }
    if !superseded.is_empty() {
        result.resolved_contradictions.push(ContradictionResolution {
            field: spec.name.clone(),
            chosen: ResolvedStatement {
                value: chosen_value,
                raw: latest.raw.clone(),
                turn_index: latest.turn_index,
            },
            superseded,
        });
    }

    let typed = match coerce(spec, &latest.raw) {
        Ok(typed) => typed,
        Err(error) => {
            result.validation_errors.push(FieldValidationError {
                field: spec.name.clone(),
                value: latest.raw.clone(),
                source_turn_index: Some(latest.turn_index),
                message: error.to_string(),
            });
            return;
        }
    };

    if let Err(message) = validate(spec, &typed) {
        result.validation_errors.push(FieldValidationError {
            field: spec.name.clone(),
            value: latest.raw.clone(),
            source_turn_index: Some(latest.turn_index),
            message,
        });
        return;
    }

    result.values.insert(
        spec.name.clone(),
        FieldValue {
            value: typed,
            raw: latest.raw.clone(),
            source_turn_index: latest.turn_index,
            confirmed: true,
        },
    );
}

fn comparable(spec: &FieldSpec, raw: &str) -> String {
    coerce(spec, raw)
        .map(|typed| typed.canonical())
        .unwrap_or_else(|_| raw.trim().to_lowercase())
}

fn same_value(left: &str, right: &str) -> bool {
    left.to_lowercase() == right.to_lowercase()
}
