//! Literal `{{field_name}}` substitution.
//!
//! Substitution is a single pass over the template text: inserted values are
//! never rescanned, so a value that itself contains `{{...}}` is emitted as
//! plain text.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template placeholder `{{{{{0}}}}}` has no matching field value")]
    UnmatchedPlaceholder(String),
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Placeholder names in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for captures in placeholder_regex().captures_iter(template) {
        let name = captures[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

pub fn render(template: &str, values: &BTreeMap<String, String>) -> Result<String, TemplateError> {
    if let Some(unmatched) = placeholders(template).into_iter().find(|name| !values.contains_key(name))
    {
        return Err(TemplateError::UnmatchedPlaceholder(unmatched));
    }

    let rendered = placeholder_regex().replace_all(template, |captures: &Captures<'_>| {
        values.get(&captures[1]).cloned().unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

/// Template text with every placeholder removed.
pub fn boilerplate(template: &str) -> String {
    placeholder_regex().replace_all(template, " ").into_owned()
}
