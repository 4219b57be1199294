//! Deterministic input screening.
//!
//! Rules live in a table of compiled matchers. Injection rules are evaluated
//! before advice rules, and the first match wins, so a message that trips both
//! is reported as the more severe injection attempt.

use std::sync::Arc;

use docwright_core::domain::guardrail::{GuardrailClassification, GuardrailVerdict};
use docwright_core::domain::schema::GuardrailPhrases;
use docwright_core::errors::SessionError;
use regex::Regex;

#[derive(Clone, Debug)]
enum Matcher {
    Phrase(String),
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, normalized: &str) -> bool {
        match self {
            Self::Phrase(phrase) => normalized.contains(phrase.as_str()),
            Self::Pattern(pattern) => pattern.is_match(normalized),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GuardrailRule {
    pub id: String,
    pub classification: GuardrailClassification,
    pub reason: &'static str,
    matcher: Matcher,
}

const INJECTION_RULES: &[(&str, &str, &str)] = &[
    (
        "injection.ignore_instructions",
        r"\b(?:ignore|disregard|forget|override|bypass)\b.{0,40}\b(?:previous|prior|above|earlier|all|your|system)\b.{0,24}\b(?:instructions?|prompts?|rules?|directions?|guidelines?)\b",
        "attempts to override system instructions",
    ),
    (
        "injection.reveal_prompt",
        r"\b(?:reveal|show|print|repeat|display|tell me|what is|what's|leak|output|dump)\b.{0,40}\b(?:system|hidden|initial|original|secret|internal)\s+(?:prompt|instructions?|message|rules)\b",
        "requests hidden system instructions",
    ),
    (
        "injection.role_switch",
        r"\b(?:you are now|act as|pretend (?:to be|you are)|from now on,? you|roleplay as|developer mode|jailbreak|do anything now)\b",
        "attempts to switch the assistant's role",
    ),
    (
        "injection.delimiter",
        r"(?m)(?:<\|?(?:im_start|im_end|system|endoftext)\|?>|\[/?(?:inst|system)\]|###\s*(?:system|instruction)|^\s*(?:system|assistant)\s*:)",
        "contains role or delimiter control sequences",
    ),
    (
        "injection.new_instructions",
        r"\bnew (?:instructions|rules|system prompt)\b",
        "supplies replacement instructions",
    ),
];

const ADVICE_RULES: &[(&str, &str, &str)] = &[
    ("advice.should_i", r"\bshould (?:i|we)\b", "asks whether to take a legal course of action"),
    (
        "advice.what_happens_if",
        r"\bwhat (?:happens|would happen|will happen|could happen) if (?:i|we)\b",
        "asks about legal consequences",
    ),
    (
        "advice.is_it_legal",
        r"\bis (?:it|this|that) (?:legal|lawful|illegal|allowed|enforceable|binding)\b",
        "asks for a legality judgment",
    ),
    (
        "advice.can_i_legally",
        r"\b(?:can|could|may) (?:i|we) (?:legally|lawfully)\b",
        "asks for a legality judgment",
    ),
    (
        "advice.recommendation",
        r"\b(?:(?:do|would|can|could) you|what (?:do|would) you) (?:recommend|advise|suggest)\b",
        "asks for a recommendation",
    ),
    (
        "advice.best_option",
        r"\b(?:what is|what's|which is) the (?:best|safest|smartest) (?:way|option|approach|strategy|clause)\b",
        "asks for a recommendation",
    ),
    ("advice.legal_advice", r"\blegal advice\b", "asks for legal advice"),
    (
        "advice.liability",
        r"\b(?:am i|are we|will i be|would i be) (?:liable|at risk|in trouble|protected)\b",
        "asks for a liability assessment",
    ),
];

fn compile_table(
    table: &[(&str, &str, &'static str)],
    classification: GuardrailClassification,
) -> Vec<GuardrailRule> {
    table
        .iter()
        .map(|(id, pattern, reason)| GuardrailRule {
            id: (*id).to_string(),
            classification,
            reason: *reason,
            matcher: Matcher::Pattern(
                Regex::new(&format!("(?i){pattern}")).expect("built-in guardrail rule is valid"),
            ),
        })
        .collect()
}

/// Lowercases, unifies apostrophes and collapses whitespace so that phrase
/// rules see one spelling of each message.
pub fn normalize(text: &str) -> String {
    text.replace(['\u{2019}', '\u{2018}', '`'], "'")
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone, Debug)]
pub struct GuardrailEngine {
    builtin: Arc<Vec<GuardrailRule>>,
    injection_phrases: Vec<GuardrailRule>,
    advice_phrases: Vec<GuardrailRule>,
    min_chars: usize,
    max_chars: usize,
}

impl Default for GuardrailEngine {
    fn default() -> Self {
        Self::builtin(1, 4_000)
    }
}

impl GuardrailEngine {
    pub fn builtin(min_chars: usize, max_chars: usize) -> Self {
        let mut rules = compile_table(INJECTION_RULES, GuardrailClassification::InjectionAttempt);
        rules.extend(compile_table(ADVICE_RULES, GuardrailClassification::AdviceRequest));
        Self {
            builtin: Arc::new(rules),
            injection_phrases: Vec::new(),
            advice_phrases: Vec::new(),
            min_chars,
            max_chars,
        }
    }

    /// Engine for one document type: the built-in table plus the phrases its
    /// schema declares. Schema phrases never replace built-in rules.
    pub fn for_document(&self, doc_type_id: &str, phrases: &GuardrailPhrases) -> Self {
        let phrase_rules = |values: &[String],
                            kind: &str,
                            classification: GuardrailClassification,
                            reason: &'static str| {
            values
                .iter()
                .map(|value| normalize(value))
                .filter(|value| !value.is_empty())
                .enumerate()
                .map(|(index, phrase)| GuardrailRule {
                    id: format!("{doc_type_id}.{kind}.{index}"),
                    classification,
                    reason,
                    matcher: Matcher::Phrase(phrase),
                })
                .collect::<Vec<_>>()
        };

        Self {
            builtin: Arc::clone(&self.builtin),
            injection_phrases: phrase_rules(
                &phrases.injection_patterns,
                "injection",
                GuardrailClassification::InjectionAttempt,
                "matches a document-specific injection phrase",
            ),
            advice_phrases: phrase_rules(
                &phrases.advice_keywords,
                "advice",
                GuardrailClassification::AdviceRequest,
                "matches a document-specific advice phrase",
            ),
            min_chars: self.min_chars,
            max_chars: self.max_chars,
        }
    }

    /// Every rule in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &GuardrailRule> {
        let (injection, advice): (Vec<&GuardrailRule>, Vec<&GuardrailRule>) = self
            .builtin
            .iter()
            .partition(|rule| rule.classification == GuardrailClassification::InjectionAttempt);
        injection
            .into_iter()
            .chain(self.injection_phrases.iter())
            .chain(advice)
            .chain(self.advice_phrases.iter())
    }

    /// Pure classification; identical text always yields an identical verdict.
    pub fn classify(&self, text: &str) -> GuardrailVerdict {
        let normalized = normalize(text);
        self.rules()
            .find(|rule| rule.matcher.matches(&normalized))
            .map(|rule| GuardrailVerdict {
                classification: rule.classification,
                matched_rule_id: Some(rule.id.clone()),
                reason: rule.reason.to_string(),
            })
            .unwrap_or_else(GuardrailVerdict::safe)
    }

    /// Rejects empty and over-length input. Over-length text is never truncated.
    pub fn check_length(&self, text: &str) -> Result<(), SessionError> {
        let length = text.trim().chars().count();
        if length < self.min_chars {
            return Err(SessionError::Validation {
                field: "message".to_string(),
                message: "message is empty".to_string(),
            });
        }
        if text.chars().count() > self.max_chars {
            return Err(SessionError::Validation {
                field: "message".to_string(),
                message: format!("message exceeds {} characters", self.max_chars),
            });
        }
        Ok(())
    }
}
