//! Type coercion and rule validation for stated field values.

use std::str::FromStr;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::schema::{compile_pattern, FieldSpec, FieldType, ValidationRule};
use crate::domain::session::TypedValue;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CoercionError {
    #[error("value is empty")]
    Empty,
    #[error("`{0}` is not a recognisable calendar date")]
    InvalidDate(String),
    #[error("`{0}` is not a number")]
    InvalidNumber(String),
    #[error("`{value}` is not one of: {}", allowed.join(", "))]
    NotAllowed { value: String, allowed: Vec<String> },
}

const MONTHS: &str = "jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec";

const NUMBER_WORDS: [(&str, u32); 28] = [
    ("zero", 0),
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("eleven", 11),
    ("twelve", 12),
    ("thirteen", 13),
    ("fourteen", 14),
    ("fifteen", 15),
    ("sixteen", 16),
    ("seventeen", 17),
    ("eighteen", 18),
    ("nineteen", 19),
    ("twenty", 20),
    ("thirty", 30),
    ("forty", 40),
    ("fifty", 50),
    ("sixty", 60),
    ("seventy", 70),
    ("eighty", 80),
    ("ninety", 90),
];

const DATE_FORMATS: [&str; 10] = [
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d-%B-%Y",
    "%d-%b-%Y",
];

/// Regex source matching a date-shaped span in free text.
pub fn date_span_pattern() -> String {
    format!(
        r"(?i)\b(?:\d{{4}}-\d{{2}}-\d{{2}}|\d{{1,2}}[/.-]\d{{1,2}}[/.-]\d{{4}}|\d{{1,2}}(?:st|nd|rd|th)?(?:\s+of)?[\s-]+(?:{MONTHS})[a-z]*\.?,?[\s-]+\d{{4}}|(?:{MONTHS})[a-z]*\.?\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}})\b"
    )
}

/// Regex source matching a number-shaped span in free text.
pub fn number_span_pattern() -> String {
    let words = NUMBER_WORDS.iter().map(|(word, _)| *word).collect::<Vec<_>>().join("|");
    format!(r"(?i)(?:[$£€]\s?)?-?\d[\d,]*(?:\.\d+)?|\b(?:{words})\b")
}

pub(crate) fn date_span_regex() -> &'static Regex {
    static DATE_SPAN: OnceLock<Regex> = OnceLock::new();
    DATE_SPAN.get_or_init(|| Regex::new(&date_span_pattern()).expect("date span regex is valid"))
}

pub(crate) fn number_span_regex() -> &'static Regex {
    static NUMBER_SPAN: OnceLock<Regex> = OnceLock::new();
    NUMBER_SPAN
        .get_or_init(|| Regex::new(&number_span_pattern()).expect("number span regex is valid"))
}

fn ordinal_regex() -> &'static Regex {
    static ORDINAL: OnceLock<Regex> = OnceLock::new();
    ORDINAL.get_or_init(|| {
        Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").expect("ordinal regex is valid")
    })
}

pub fn coerce(spec: &FieldSpec, raw: &str) -> Result<TypedValue, CoercionError> {
    let trimmed = normalize_whitespace(raw);
    if trimmed.is_empty() {
        return Err(CoercionError::Empty);
    }

    match spec.field_type {
        FieldType::String => {
            let text = trimmed.trim_end_matches(['.', ',', ';', ':']).trim().to_string();
            if text.is_empty() {
                Err(CoercionError::Empty)
            } else {
                Ok(TypedValue::Text(text))
            }
        }
        FieldType::Date => parse_date(&trimmed).map(TypedValue::Date),
        FieldType::Number => parse_number(&trimmed).map(TypedValue::Number),
        FieldType::Enum => match_allowed(&spec.allowed, &trimmed).map(TypedValue::Choice),
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, CoercionError> {
    let without_ordinals = ordinal_regex().replace_all(raw, "$1");
    let cleaned = without_ordinals
        .replace(',', " ")
        .split_whitespace()
        .filter(|word| !word.eq_ignore_ascii_case("of"))
        .map(|word| word.trim_end_matches('.'))
        .collect::<Vec<_>>()
        .join(" ");

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&cleaned, format).ok())
        .ok_or_else(|| CoercionError::InvalidDate(raw.to_string()))
}

pub fn parse_number(raw: &str) -> Result<Decimal, CoercionError> {
    let lowered = raw.trim().to_ascii_lowercase();
    if let Some((_, value)) = NUMBER_WORDS.iter().find(|(word, _)| *word == lowered) {
        return Ok(Decimal::from(*value));
    }

    let span = number_span_regex()
        .find(raw)
        .map(|found| found.as_str())
        .ok_or_else(|| CoercionError::InvalidNumber(raw.to_string()))?;
    let span_lowered = span.to_ascii_lowercase();
    if let Some((_, value)) = NUMBER_WORDS.iter().find(|(word, _)| *word == span_lowered) {
        return Ok(Decimal::from(*value));
    }

    let digits: String =
        span.chars().filter(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-')).collect();
    Decimal::from_str(&digits)
        .map(|number| number.normalize())
        .map_err(|_| CoercionError::InvalidNumber(raw.to_string()))
}

fn match_allowed(allowed: &[String], raw: &str) -> Result<String, CoercionError> {
    let lowered = raw.trim_end_matches(['.', ',', ';']).to_lowercase();
    if let Some(exact) = allowed.iter().find(|value| value.to_lowercase() == lowered) {
        return Ok(exact.clone());
    }

    let words: Vec<&str> = lowered.split(|ch: char| !ch.is_alphanumeric()).collect();
    let mentioned: Vec<&String> = allowed
        .iter()
        .filter(|value| {
            let needle = value.to_lowercase();
            words.iter().any(|word| *word == needle) || lowered.contains(&format!(" {needle} "))
        })
        .collect();

    match mentioned.as_slice() {
        [single] => Ok((*single).clone()),
        _ => Err(CoercionError::NotAllowed { value: raw.to_string(), allowed: allowed.to_vec() }),
    }
}

/// Applies the field's validation rule to an already coerced value.
pub fn validate(spec: &FieldSpec, value: &TypedValue) -> Result<(), String> {
    let Some(rule) = &spec.validation else {
        return Ok(());
    };

    let canonical = value.canonical();
    let satisfied = match rule {
        ValidationRule::Pattern { regex } => {
            let compiled = compile_pattern(&spec.name, regex).map_err(|error| error.to_string())?;
            compiled.is_match(&canonical)
        }
        ValidationRule::Range { min, max } => match value {
            TypedValue::Number(number) => {
                min.map_or(true, |min| *number >= min) && max.map_or(true, |max| *number <= max)
            }
            _ => false,
        },
        ValidationRule::OneOf { values } => {
            values.iter().any(|allowed| allowed.eq_ignore_ascii_case(&canonical))
        }
        ValidationRule::Length { min, max } => {
            let length = canonical.chars().count();
            min.map_or(true, |min| length >= min) && max.map_or(true, |max| length <= max)
        }
    };

    if satisfied {
        Ok(())
    } else {
        Err(format!("`{canonical}` {}", rule.describe()))
    }
}

fn normalize_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
