use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use docwright_cli::commands::{classify, config, doc_types, doctor, smoke};
use serde_json::Value;
use tempfile::TempDir;

const NDA_YAML: &str = r#"
document_type: nda
display_name: Mutual Non-Disclosure Agreement
description: Two-party confidentiality agreement
template: nda.txt
fields:
  - name: party_a
    type: string
    label: Party A
    description: Full legal name of the first party
  - name: party_b
    type: string
    label: Party B
  - name: term_years
    type: number
    label: term
    validation:
      kind: range
      min: 1
      max: 10
guardrails:
  advice_keywords:
    - loophole
"#;

const NDA_TEMPLATE: &str = "MUTUAL NON-DISCLOSURE AGREEMENT\n\nThis Agreement is made between \
{{party_a}} and {{party_b}} and remains in force for {{term_years}} years.\n";

fn catalogue() -> TempDir {
    let root = tempfile::tempdir().expect("tempdir");
    write_catalogue(root.path());
    root
}

fn write_catalogue(root: &Path) {
    fs::create_dir_all(root.join("doc_types")).expect("schema dir");
    fs::create_dir_all(root.join("templates")).expect("template dir");
    fs::write(root.join("doc_types/nda.yaml"), NDA_YAML).expect("schema");
    fs::write(root.join("templates/nda.txt"), NDA_TEMPLATE).expect("template");
}

fn catalogue_env(root: &Path) -> Vec<(&'static str, String)> {
    vec![
        ("DOCWRIGHT_LLM_PROVIDER", "stub".to_string()),
        ("DOCWRIGHT_SCHEMAS_DIRECTORY", root.join("doc_types").display().to_string()),
        ("DOCWRIGHT_SCHEMAS_TEMPLATES_DIRECTORY", root.join("templates").display().to_string()),
    ]
}

#[test]
fn doc_types_lists_the_catalogue() {
    let root = catalogue();
    with_env(&catalogue_env(root.path()), || {
        let result = doc_types::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "doc-types");
        assert_eq!(payload["doc_types"][0]["doc_type_id"], "nda");
        assert_eq!(payload["doc_types"][0]["total_fields"], 3);
    });
}

#[test]
fn doc_types_reports_missing_schema_directory() {
    let root = tempfile::tempdir().expect("tempdir");
    with_env(&catalogue_env(root.path()), || {
        let result = doc_types::run();
        assert_eq!(result.exit_code, 3);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "schema_load");
    });
}

#[test]
fn classify_layers_document_phrases() {
    let root = catalogue();
    with_env(&catalogue_env(root.path()), || {
        let generic = classify::run("Is there a loophole here?", None);
        assert_eq!(generic.exit_code, 0);

        let scoped = classify::run("Is there a loophole here?", Some("nda"));
        assert_eq!(scoped.exit_code, classify::REFUSED_EXIT_CODE);
        let payload = parse_payload(&scoped.output);
        assert_eq!(payload["verdict"]["classification"], "advice_request");
    });
}

#[test]
fn doctor_passes_with_stub_provider_and_catalogue() {
    let root = catalogue();
    with_env(&catalogue_env(root.path()), || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        assert_eq!(payload["checks"].as_array().map(Vec::len), Some(3));
    });
}

#[test]
fn doctor_fails_when_hosted_provider_has_no_key() {
    let root = catalogue();
    let mut vars = catalogue_env(root.path());
    vars[0].1 = "groq".to_string();
    with_env(&vars, || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["checks"][0]["status"], "fail");
        assert_eq!(payload["checks"][1]["status"], "skipped");
    });
}

#[test]
fn config_reports_env_sources_and_redacts_keys() {
    let root = catalogue();
    let mut vars = catalogue_env(root.path());
    vars.push(("DOCWRIGHT_LLM_API_KEY", "gsk_supersecretvalue".to_string()));
    with_env(&vars, || {
        let output = config::run();
        assert!(output.contains("- llm.provider = stub (source: env (DOCWRIGHT_LLM_PROVIDER))"));
        assert!(output.contains("- llm.api_key = gsk_***"));
        assert!(!output.contains("supersecretvalue"));
        assert!(output.contains("- session.violation_threshold = 3 (source: default)"));
    });
}

#[test]
fn smoke_returns_success_report_with_valid_catalogue() {
    let root = catalogue();
    with_env(&catalogue_env(root.path()), || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "pass");
        assert_eq!(payload["checks"].as_array().map(Vec::len), Some(5));
    });
}

#[test]
fn smoke_returns_failure_when_config_invalid() {
    with_env(&[("DOCWRIGHT_LOGGING_FORMAT", "xml".to_string())], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 6, "expected smoke failure code");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "fail");
        assert_eq!(payload["checks"][1]["status"], "skipped");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, String)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);

    let keys = [
        "DOCWRIGHT_LLM_PROVIDER",
        "DOCWRIGHT_LLM_API_KEY",
        "GROQ_API_KEY",
        "DOCWRIGHT_LLM_BASE_URL",
        "DOCWRIGHT_LLM_CONVERSATION_MODEL",
        "DOCWRIGHT_LLM_DRAFTING_MODEL",
        "DOCWRIGHT_LLM_TIMEOUT_SECS",
        "DOCWRIGHT_LLM_MAX_RETRIES",
        "DOCWRIGHT_SESSION_TTL_SECS",
        "DOCWRIGHT_SESSION_VIOLATION_THRESHOLD",
        "DOCWRIGHT_SESSION_MAX_EXTRACTION_ATTEMPTS",
        "DOCWRIGHT_SESSION_MAX_DRAFT_ATTEMPTS",
        "DOCWRIGHT_SESSION_MAX_MESSAGE_CHARS",
        "DOCWRIGHT_SCHEMAS_DIRECTORY",
        "DOCWRIGHT_SCHEMAS_TEMPLATES_DIRECTORY",
        "DOCWRIGHT_SERVER_BIND_ADDRESS",
        "DOCWRIGHT_SERVER_PORT",
        "DOCWRIGHT_LOGGING_LEVEL",
        "DOCWRIGHT_LOGGING_FORMAT",
        "DOCWRIGHT_LOG_LEVEL",
        "DOCWRIGHT_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
