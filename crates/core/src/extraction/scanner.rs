//! Locates field statements in user turns.

use regex::Regex;

use super::coercion::{
    coerce, date_span_pattern, date_span_regex, number_span_pattern, number_span_regex,
};
use crate::domain::schema::{compile_pattern, DocumentSchema, FieldSpec, FieldType, SchemaError};
use crate::domain::session::{Turn, TurnRole, TypedValue};

const ASSERTION: &str = r"(?:(?:is|are|will be|shall be|should be)\b|=|:|-)";

/// One statement of a field value: the exact span and where it sits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub field: String,
    pub raw: String,
    pub turn_index: usize,
    pub offset: usize,
}

impl Statement {
    pub fn overlaps(&self, other: &Statement) -> bool {
        self.turn_index == other.turn_index
            && self.offset < other.offset + other.raw.len()
            && other.offset < self.offset + self.raw.len()
    }
}

#[derive(Debug)]
struct FieldMatchers {
    field: String,
    patterns: Vec<Regex>,
}

/// Statement patterns compiled once per schema.
#[derive(Debug)]
pub struct StatementScanner {
    matchers: Vec<FieldMatchers>,
}

impl StatementScanner {
    pub fn for_schema(schema: &DocumentSchema) -> Result<Self, SchemaError> {
        let matchers = schema
            .fields
            .iter()
            .map(|spec| {
                let mut patterns = spec
                    .patterns
                    .iter()
                    .map(|pattern| compile_pattern(&spec.name, pattern))
                    .collect::<Result<Vec<_>, _>>()?;
                let siblings: Vec<String> = schema
                    .fields
                    .iter()
                    .filter(|other| other.name != spec.name)
                    .map(label_pattern)
                    .collect();
                patterns.push(compile_pattern(&spec.name, &default_pattern(spec, &siblings))?);
                Ok(FieldMatchers { field: spec.name.clone(), patterns })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;
        Ok(Self { matchers })
    }

    /// Every statement for `field` across user turns, in conversation order.
    pub fn scan_field(&self, field: &str, turns: &[Turn]) -> Vec<Statement> {
        let Some(matchers) = self.matchers.iter().find(|matchers| matchers.field == field) else {
            return Vec::new();
        };

        let mut statements: Vec<Statement> = Vec::new();
        for turn in turns.iter().filter(|turn| turn.role == TurnRole::User) {
            for pattern in &matchers.patterns {
                for captures in pattern.captures_iter(&turn.text) {
                    let Some(group) = captures.name("value").or_else(|| captures.get(1)) else {
                        continue;
                    };
                    let raw = group.as_str().trim();
                    if raw.is_empty() {
                        continue;
                    }
                    let leading = group.as_str().len() - group.as_str().trim_start().len();
                    let offset = group.start() + leading;
                    let statement = Statement {
                        field: field.to_string(),
                        raw: raw.to_string(),
                        turn_index: turn.index,
                        offset,
                    };
                    if !statements.iter().any(|existing| existing.overlaps(&statement)) {
                        statements.push(statement);
                    }
                }
            }
        }

        statements.sort_by_key(|statement| (statement.turn_index, statement.offset));
        statements
    }
}

fn label_pattern(spec: &FieldSpec) -> String {
    spec.display_label()
        .split(|ch: char| ch.is_whitespace() || ch == '_')
        .filter(|word| !word.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"[\s_-]+")
}

/// "<label> is <value>" statement pattern, with a typed value span for dates
/// and numbers. Free-text values end at a clause boundary or where another
/// field's "<label> is" statement begins.
fn default_pattern(spec: &FieldSpec, siblings: &[String]) -> String {
    let label = label_pattern(spec);
    match spec.field_type {
        FieldType::Date => {
            let span = date_span_pattern().trim_start_matches("(?i)").to_string();
            format!(r"(?i)\b{label}\b[^\n.;]{{0,24}}?(?P<value>{span})")
        }
        FieldType::Number => {
            let span = number_span_pattern().trim_start_matches("(?i)").to_string();
            format!(r"(?i)\b{label}\b[^\n\d.;]{{0,24}}?(?P<value>{span})")
        }
        FieldType::String | FieldType::Enum => {
            let next_statement = if siblings.is_empty() {
                String::new()
            } else {
                format!(
                    r"|\s+(?:and\s+)?(?:the\s+)?\b(?:{})\b\s*{ASSERTION}",
                    siblings.join("|")
                )
            };
            format!(
                r"(?i)\b{label}\b\s*{ASSERTION}\s*(?P<value>[^,;\n]+?)(?:\s*(?:[,;\n]|\.\s|\.$|$){next_statement})"
            )
        }
    }
}

/// Finds where a value proposed by the generation service was stated.
///
/// Searches the referenced turn first, then every user turn from the most
/// recent backwards. Literal matches are tried before typed matches, which
/// let "5" locate "five" or "2025-03-01" locate "1st March 2025".
pub fn locate(
    spec: &FieldSpec,
    proposed: &str,
    preferred_turn: Option<usize>,
    turns: &[Turn],
) -> Option<Statement> {
    let proposed = proposed.trim();
    if proposed.is_empty() {
        return None;
    }

    let mut ordered: Vec<&Turn> = Vec::new();
    if let Some(turn) = preferred_turn.and_then(|index| turns.get(index)) {
        ordered.push(turn);
    }
    ordered.extend(turns.iter().rev().filter(|turn| Some(turn.index) != preferred_turn));

    let literal = Regex::new(&format!("(?i){}", regex::escape(proposed))).ok()?;
    let expected = coerce(spec, proposed).ok();

    for turn in ordered.into_iter().filter(|turn| turn.role == TurnRole::User) {
        if let Some(found) = literal.find(&turn.text) {
            return Some(Statement {
                field: spec.name.clone(),
                raw: found.as_str().to_string(),
                turn_index: turn.index,
                offset: found.start(),
            });
        }

        let span_regex = match spec.field_type {
            FieldType::Date => date_span_regex(),
            FieldType::Number => number_span_regex(),
            FieldType::String | FieldType::Enum => continue,
        };
        let Some(expected) = expected.as_ref() else {
            continue;
        };
        let typed_match = span_regex.find_iter(&turn.text).find(|found| {
            coerce(spec, found.as_str()).ok().as_ref().map(TypedValue::canonical)
                == Some(expected.canonical())
        });
        if let Some(found) = typed_match {
            return Some(Statement {
                field: spec.name.clone(),
                raw: found.as_str().to_string(),
                turn_index: turn.index,
                offset: found.start(),
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{locate, StatementScanner};
    use crate::domain::schema::{DocumentSchema, FieldSpec, FieldType};
    use crate::domain::session::{Turn, TurnRole};

    fn turn(index: usize, role: TurnRole, text: &str) -> Turn {
        Turn { role, text: text.to_string(), index, timestamp: Utc::now() }
    }

    fn schema() -> DocumentSchema {
        DocumentSchema {
            doc_type_id: "nda".to_string(),
            display_name: String::new(),
            description: String::new(),
            fields: vec![
                FieldSpec::new("party_a", FieldType::String).with_label("Party A"),
                FieldSpec::new("effective_date", FieldType::Date),
                FieldSpec::new("term_years", FieldType::Number)
                    .with_pattern(r"(?i)(?P<value>\d+|one|two|three|four|five)\s*-?\s*years?\b"),
            ],
            template_ref: String::new(),
            template_text: "{{party_a}}".to_string(),
            system_prompt: None,
            guardrails: Default::default(),
        }
    }

    #[test]
    fn label_statement_captures_value_up_to_clause_boundary() {
        let scanner = StatementScanner::for_schema(&schema()).expect("scanner");
        let turns = vec![turn(0, TurnRole::User, "Party A is Acme Corp, and they are in London.")];

        let statements = scanner.scan_field("party_a", &turns);
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].raw, "Acme Corp");
        assert_eq!(&turns[0].text[statements[0].offset..][..9], "Acme Corp");
    }

    #[test]
    fn free_text_value_stops_where_the_next_field_statement_begins() {
        let mut schema = schema();
        schema.fields.push(FieldSpec::new("party_b", FieldType::String).with_label("Party B"));
        schema.fields.push(FieldSpec::new("purpose", FieldType::String));
        schema.fields[2] = FieldSpec::new("term_years", FieldType::Number).with_label("term");
        let scanner = StatementScanner::for_schema(&schema).expect("scanner");
        let turns = vec![turn(
            0,
            TurnRole::User,
            "Party A is Acme Corp and Party B is Beta Ltd. The purpose is evaluating a joint \
             venture and the term is 5 years",
        )];

        let raw = |field: &str| {
            scanner.scan_field(field, &turns).into_iter().map(|s| s.raw).collect::<Vec<_>>()
        };
        assert_eq!(raw("party_a"), vec!["Acme Corp"]);
        assert_eq!(raw("party_b"), vec!["Beta Ltd"]);
        assert_eq!(raw("purpose"), vec!["evaluating a joint venture"]);
        assert_eq!(raw("term_years"), vec!["5"]);
    }

    #[test]
    fn conjunctions_inside_a_value_are_kept() {
        let scanner = StatementScanner::for_schema(&schema()).expect("scanner");
        let turns = vec![turn(0, TurnRole::User, "Party A is Smith and Jones LLP")];

        let statements = scanner.scan_field("party_a", &turns);
        assert_eq!(statements[0].raw, "Smith and Jones LLP");
    }

    #[test]
    fn system_turns_are_never_scanned() {
        let scanner = StatementScanner::for_schema(&schema()).expect("scanner");
        let turns = vec![turn(0, TurnRole::System, "Is Party A Acme Corp?")];
        assert!(scanner.scan_field("party_a", &turns).is_empty());
    }

    #[test]
    fn typed_default_pattern_finds_dates_after_label() {
        let scanner = StatementScanner::for_schema(&schema()).expect("scanner");
        let turns = vec![turn(0, TurnRole::User, "The effective date will be 1st March 2025.")];

        let statements = scanner.scan_field("effective_date", &turns);
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].raw, "1st March 2025");
    }

    #[test]
    fn statements_are_ordered_by_turn() {
        let scanner = StatementScanner::for_schema(&schema()).expect("scanner");
        let turns = vec![
            turn(0, TurnRole::User, "The term is 3 years"),
            turn(1, TurnRole::System, "Noted."),
            turn(2, TurnRole::User, "actually 5 years"),
        ];

        let raws: Vec<(usize, String)> = scanner
            .scan_field("term_years", &turns)
            .into_iter()
            .map(|statement| (statement.turn_index, statement.raw))
            .collect();
        assert_eq!(raws, vec![(0, "3".to_string()), (2, "5".to_string())]);
    }

    #[test]
    fn locate_matches_typed_equivalents() {
        let spec = FieldSpec::new("effective_date", FieldType::Date);
        let turns = vec![turn(0, TurnRole::User, "We start on the 1st of March, 2025 if that works")];

        let located = locate(&spec, "2025-03-01", None, &turns).expect("typed match");
        assert_eq!(located.raw, "1st of March, 2025");
        assert_eq!(located.turn_index, 0);

        assert!(locate(&spec, "2025-04-01", None, &turns).is_none());
    }
}
