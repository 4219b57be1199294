//! Fact-containment check for drafted documents.
//!
//! Every number, calendar date and capitalized name in a draft must be
//! traceable to the template boilerplate or to a collected field value.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;

use crate::domain::session::{FieldValue, TypedValue};
use crate::extraction::coercion::{date_span_regex, parse_date, parse_number};
use crate::template;

fn digits_regex() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("digits regex is valid"))
}

fn proper_name_regex() -> &'static Regex {
    static PROPER_NAME: OnceLock<Regex> = OnceLock::new();
    PROPER_NAME.get_or_init(|| {
        Regex::new(r"\b[A-Z][\w&'-]*(?:\s+[A-Z][\w&'-]*)+").expect("proper name regex is valid")
    })
}

fn word_regex() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"[\w&'-]+").expect("word regex is valid"))
}

/// Everything a draft is allowed to assert.
#[derive(Clone, Debug, Default)]
pub struct FactSupport {
    numbers: BTreeSet<Decimal>,
    dates: BTreeSet<NaiveDate>,
    words: BTreeSet<String>,
}

impl FactSupport {
    pub fn new(template_text: &str, fields: &BTreeMap<String, FieldValue>) -> Self {
        let mut support = Self::default();
        support.absorb_text(&template::boilerplate(template_text));

        for value in fields.values() {
            support.absorb_text(&value.raw);
            support.absorb_text(&value.value.canonical());
            match &value.value {
                TypedValue::Date(date) => support.absorb_date(*date),
                TypedValue::Number(number) => {
                    support.numbers.insert(number.normalize());
                }
                TypedValue::Text(_) | TypedValue::Choice(_) => {}
            }
            if let Ok(number) = parse_number(&value.raw) {
                support.numbers.insert(number);
            }
        }
        support
    }

    /// Adds rendered text, such as the filled template, to the support set.
    pub fn absorb_text(&mut self, text: &str) {
        for found in digits_regex().find_iter(text) {
            if let Some(number) = decimal(found.as_str()) {
                self.numbers.insert(number);
            }
        }
        for found in date_span_regex().find_iter(text) {
            if let Ok(date) = parse_date(found.as_str()) {
                self.absorb_date(date);
            }
        }
        for found in word_regex().find_iter(text) {
            self.words.insert(found.as_str().to_lowercase());
        }
    }

    fn absorb_date(&mut self, date: NaiveDate) {
        self.dates.insert(date);
        self.numbers.insert(Decimal::from(date.day()));
        self.numbers.insert(Decimal::from(date.month()));
        self.numbers.insert(Decimal::from(date.year()));
    }

    /// Facts in `draft` that nothing in the support set accounts for, in
    /// order of first appearance.
    pub fn unsupported_facts(&self, draft: &str) -> Vec<String> {
        let mut unsupported: Vec<String> = Vec::new();
        let mut push = |fact: &str| {
            if !unsupported.iter().any(|existing| existing == fact) {
                unsupported.push(fact.to_string());
            }
        };

        for found in date_span_regex().find_iter(draft) {
            match parse_date(found.as_str()) {
                Ok(date) if self.dates.contains(&date) => {}
                _ => push(found.as_str()),
            }
        }
        for found in digits_regex().find_iter(draft) {
            let supported =
                decimal(found.as_str()).map_or(false, |number| self.numbers.contains(&number));
            if !supported {
                push(found.as_str());
            }
        }
        for found in proper_name_regex().find_iter(draft) {
            let all_known = word_regex()
                .find_iter(found.as_str())
                .all(|word| self.words.contains(&word.as_str().to_lowercase()));
            if !all_known {
                push(found.as_str());
            }
        }

        unsupported
    }
}

fn decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.chars().filter(|ch| *ch != ',').collect();
    Decimal::from_str(cleaned.trim_end_matches('.')).ok().map(|number| number.normalize())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::FactSupport;
    use crate::domain::session::{FieldValue, TypedValue};

    const TEMPLATE: &str = "This Mutual Non-Disclosure Agreement is made on {{effective_date}} between \
{{party_a}} and {{party_b}}. It lasts {{term_years}} years under the laws of {{jurisdiction}}. \
Clause 7 survives termination.";

    fn fields() -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        let mut put = |name: &str, value: TypedValue, raw: &str| {
            fields.insert(
                name.to_string(),
                FieldValue { value, raw: raw.to_string(), source_turn_index: 0, confirmed: true },
            );
        };
        put("party_a", TypedValue::Text("Acme Corp".to_string()), "Acme Corp");
        put("party_b", TypedValue::Text("Beta Ltd".to_string()), "Beta Ltd");
        put(
            "effective_date",
            TypedValue::Date(NaiveDate::from_ymd_opt(2025, 3, 1).expect("date")),
            "1st March 2025",
        );
        put("term_years", TypedValue::Number(Decimal::from(5)), "five");
        put("jurisdiction", TypedValue::Choice("England and Wales".to_string()), "england and wales");
        fields
    }

    #[test]
    fn faithful_draft_has_no_unsupported_facts() {
        let support = FactSupport::new(TEMPLATE, &fields());
        let draft = "This Mutual Non-Disclosure Agreement is made on 1 March 2025 between Acme Corp \
and Beta Ltd. It lasts 5 years under the laws of England and Wales. Clause 7 survives termination.";

        assert_eq!(support.unsupported_facts(draft), Vec::<String>::new());
    }

    #[test]
    fn iso_and_long_dates_are_equivalent() {
        let support = FactSupport::new(TEMPLATE, &fields());
        assert!(support.unsupported_facts("Effective 2025-03-01.").is_empty());
    }

    #[test]
    fn invented_names_numbers_and_dates_are_reported() {
        let support = FactSupport::new(TEMPLATE, &fields());
        let draft = "Acme Corp and Initech Holdings agree to pay 25,000 by 4 July 2026.";

        let unsupported = support.unsupported_facts(draft);
        assert!(unsupported.contains(&"Initech Holdings".to_string()), "{unsupported:?}");
        assert!(unsupported.contains(&"25,000".to_string()));
        assert!(unsupported.contains(&"4 July 2026".to_string()));
        assert!(!unsupported.iter().any(|fact| fact.contains("Acme")));
    }
}
