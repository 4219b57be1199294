use docwright_agent::GuardrailEngine;
use docwright_core::domain::guardrail::GuardrailVerdict;
use docwright_core::schemas::SchemaSource;
use serde::Serialize;

use crate::commands::{load_catalogue, CommandResult};

/// Exit code when the message would be refused.
pub const REFUSED_EXIT_CODE: u8 = 4;

#[derive(Debug, Serialize)]
struct ClassifyReport<'a> {
    command: &'static str,
    doc_type: Option<&'a str>,
    message_chars: usize,
    verdict: GuardrailVerdict,
    refusal: Option<&'static str>,
}

pub fn run(text: &str, doc_type: Option<&str>) -> CommandResult {
    let engine = match doc_type {
        None => GuardrailEngine::default(),
        Some(doc_type_id) => {
            let (config, schemas) = match load_catalogue("classify") {
                Ok(loaded) => loaded,
                Err(result) => return result,
            };
            let schema = match schemas.get(doc_type_id) {
                Ok(schema) => schema,
                Err(error) => {
                    return CommandResult::failure(
                        "classify",
                        "unknown_doc_type",
                        error.to_string(),
                        3,
                    );
                }
            };
            GuardrailEngine::builtin(
                config.session.min_message_chars,
                config.session.max_message_chars,
            )
            .for_document(&schema.doc_type_id, &schema.guardrails)
        }
    };

    let verdict = engine.classify(text);
    let refused = !verdict.is_safe();
    let report = ClassifyReport {
        command: "classify",
        doc_type,
        message_chars: text.chars().count(),
        refusal: verdict.refusal_message(),
        verdict,
    };

    let mut result = CommandResult::success_json("classify", &report);
    if refused && result.exit_code == 0 {
        result.exit_code = REFUSED_EXIT_CODE;
    }
    result
}
