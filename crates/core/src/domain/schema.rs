//! Document type schemas.
//!
//! A schema is the read-only description of one document type: the ordered
//! field specifications the conversation must collect, the validation rule
//! applied to each value, and the template the drafter fills in.

use std::collections::BTreeSet;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::template;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    String,
    Date,
    Number,
    Enum,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Date => "date",
            Self::Number => "number",
            Self::Enum => "enum",
        }
    }
}

/// Rule a coerced value must satisfy before it is trusted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationRule {
    Pattern { regex: String },
    Range { min: Option<Decimal>, max: Option<Decimal> },
    OneOf { values: Vec<String> },
    Length { min: Option<usize>, max: Option<usize> },
}

impl ValidationRule {
    pub fn describe(&self) -> String {
        match self {
            Self::Pattern { regex } => format!("must match pattern `{regex}`"),
            Self::Range { min, max } => match (min, max) {
                (Some(min), Some(max)) => format!("must be between {min} and {max}"),
                (Some(min), None) => format!("must be at least {min}"),
                (None, Some(max)) => format!("must be at most {max}"),
                (None, None) => "must be a number".to_string(),
            },
            Self::OneOf { values } => format!("must be one of: {}", values.join(", ")),
            Self::Length { min, max } => match (min, max) {
                (Some(min), Some(max)) => format!("must be {min} to {max} characters long"),
                (Some(min), None) => format!("must be at least {min} characters long"),
                (None, Some(max)) => format!("must be at most {max} characters long"),
                (None, None) => "must be text".to_string(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub validation: Option<ValidationRule>,
    #[serde(default, alias = "description")]
    pub prompt_hint: String,
    /// Human label used when a statement names the field ("Party A is ...").
    #[serde(default)]
    pub label: Option<String>,
    /// Allowed values for `enum` fields, matched case-insensitively.
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Statement capture patterns. Each must contain a `value` group or a
    /// first capture group holding the stated value.
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            validation: None,
            prompt_hint: String::new(),
            label: None,
            allowed: Vec::new(),
            patterns: Vec::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.prompt_hint = hint.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validation = Some(rule);
        self
    }

    /// Label used in prompts and in the default statement pattern.
    pub fn display_label(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.name.replace('_', " "))
    }
}

/// Phrases a document type adds on top of the built-in guardrail table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailPhrases {
    #[serde(default)]
    pub advice_keywords: Vec<String>,
    #[serde(default)]
    pub injection_patterns: Vec<String>,
}

impl GuardrailPhrases {
    pub fn is_empty(&self) -> bool {
        self.advice_keywords.is_empty() && self.injection_patterns.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentSchema {
    #[serde(alias = "document_type")]
    pub doc_type_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "required_fields")]
    pub fields: Vec<FieldSpec>,
    /// Template file name, resolved by the schema source into `template_text`.
    #[serde(default, alias = "template")]
    pub template_ref: String,
    #[serde(default)]
    pub template_text: String,
    /// Conversation instructions with `{fields}` and `{collected}` slots.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub guardrails: GuardrailPhrases,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("document type `{0}` is not defined")]
    UnknownDocType(String),
    #[error("schema `{doc_type}` declares field `{field}` more than once")]
    DuplicateField { doc_type: String, field: String },
    #[error("schema `{doc_type}` has no fields")]
    NoFields { doc_type: String },
    #[error("enum field `{field}` in schema `{doc_type}` has no allowed values")]
    EmptyEnum { doc_type: String, field: String },
    #[error("invalid pattern for field `{field}`: {message}")]
    InvalidPattern { field: String, message: String },
    #[error("template for `{doc_type}` references unknown field `{placeholder}`")]
    UnknownPlaceholder { doc_type: String, placeholder: String },
    #[error("schema `{doc_type}` has an empty template")]
    EmptyTemplate { doc_type: String },
    #[error("could not load schema from `{path}`: {message}")]
    Load { path: String, message: String },
}

impl DocumentSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|spec| spec.required)
    }

    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.doc_type_id
        } else {
            &self.display_name
        }
    }

    /// Structural checks run once at load time.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::NoFields { doc_type: self.doc_type_id.clone() });
        }

        let mut seen = BTreeSet::new();
        for spec in &self.fields {
            if !seen.insert(spec.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    doc_type: self.doc_type_id.clone(),
                    field: spec.name.clone(),
                });
            }
            if spec.field_type == FieldType::Enum && spec.allowed.is_empty() {
                return Err(SchemaError::EmptyEnum {
                    doc_type: self.doc_type_id.clone(),
                    field: spec.name.clone(),
                });
            }
            for pattern in &spec.patterns {
                compile_pattern(&spec.name, pattern)?;
            }
            if let Some(ValidationRule::Pattern { regex }) = &spec.validation {
                compile_pattern(&spec.name, regex)?;
            }
        }

        if self.template_text.trim().is_empty() {
            return Err(SchemaError::EmptyTemplate { doc_type: self.doc_type_id.clone() });
        }
        for placeholder in template::placeholders(&self.template_text) {
            if self.field(&placeholder).is_none() {
                return Err(SchemaError::UnknownPlaceholder {
                    doc_type: self.doc_type_id.clone(),
                    placeholder,
                });
            }
        }

        Ok(())
    }
}

pub(crate) fn compile_pattern(field: &str, pattern: &str) -> Result<Regex, SchemaError> {
    Regex::new(pattern).map_err(|error| SchemaError::InvalidPattern {
        field: field.to_string(),
        message: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{DocumentSchema, FieldSpec, FieldType, SchemaError};

    fn schema(template_text: &str) -> DocumentSchema {
        DocumentSchema {
            doc_type_id: "nda".to_string(),
            display_name: "Non-Disclosure Agreement".to_string(),
            description: String::new(),
            fields: vec![
                FieldSpec::new("party_a", FieldType::String),
                FieldSpec::new("jurisdiction", FieldType::Enum)
                    .with_allowed(["England", "Scotland"]),
            ],
            template_ref: "nda.txt".to_string(),
            template_text: template_text.to_string(),
            system_prompt: None,
            guardrails: Default::default(),
        }
    }

    #[test]
    fn yaml_document_type_deserializes_with_original_aliases() {
        let raw = r#"
document_type: will
display_name: Last Will
required_fields:
  - name: testator_name
    description: Full legal name of the person making the will
  - name: signing_date
    type: date
    required: false
  - name: executor_count
    type: number
    validation:
      kind: range
      min: 1
      max: 4
template: will.txt
guardrails:
  advice_keywords: ["should i disinherit"]
"#;
        let parsed: DocumentSchema = serde_yaml::from_str(raw).expect("yaml should parse");

        assert_eq!(parsed.doc_type_id, "will");
        assert_eq!(parsed.fields.len(), 3);
        assert_eq!(parsed.fields[0].field_type, FieldType::String);
        assert!(parsed.fields[0].required);
        assert!(parsed.fields[0].prompt_hint.starts_with("Full legal name"));
        assert!(!parsed.fields[1].required);
        assert_eq!(parsed.template_ref, "will.txt");
        assert_eq!(parsed.guardrails.advice_keywords, vec!["should i disinherit".to_string()]);
    }

    #[test]
    fn validate_accepts_well_formed_schema() {
        assert_eq!(schema("Between {{party_a}} under the law of {{jurisdiction}}.").validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_placeholder_without_field() {
        let error = schema("Between {{party_a}} and {{party_b}}.").validate().expect_err("unknown");
        assert_eq!(
            error,
            SchemaError::UnknownPlaceholder {
                doc_type: "nda".to_string(),
                placeholder: "party_b".to_string()
            }
        );
    }

    #[test]
    fn validate_rejects_enum_without_allowed_values() {
        let mut invalid = schema("{{party_a}}");
        invalid.fields.push(FieldSpec::new("governing_law", FieldType::Enum));
        assert!(matches!(invalid.validate(), Err(SchemaError::EmptyEnum { .. })));
    }

    #[test]
    fn validate_rejects_duplicate_fields_and_bad_patterns() {
        let mut duplicated = schema("{{party_a}}");
        duplicated.fields.push(FieldSpec::new("party_a", FieldType::String));
        assert!(matches!(duplicated.validate(), Err(SchemaError::DuplicateField { .. })));

        let mut bad_pattern = schema("{{party_a}}");
        bad_pattern.fields[0] = FieldSpec::new("party_a", FieldType::String).with_pattern("(unclosed");
        assert!(matches!(bad_pattern.validate(), Err(SchemaError::InvalidPattern { .. })));
    }
}
