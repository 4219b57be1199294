use docwright_agent::generation::service_from_config;
use docwright_core::config::{AppConfig, LlmProvider, LoadOptions};
use docwright_core::schemas::{SchemaSource, YamlSchemaDirectory};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_schema_catalogue(&config));
            checks.push(check_generation_provider(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["schema_catalogue", "generation_provider"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_schema_catalogue(config: &AppConfig) -> DoctorCheck {
    match YamlSchemaDirectory::load(&config.schemas.directory, &config.schemas.templates_directory)
    {
        Ok(schemas) if schemas.list().is_empty() => DoctorCheck {
            name: "schema_catalogue",
            status: CheckStatus::Fail,
            details: format!(
                "no document types found in `{}`",
                config.schemas.directory.display()
            ),
        },
        Ok(schemas) => {
            let ids: Vec<String> =
                schemas.list().into_iter().map(|summary| summary.doc_type_id).collect();
            DoctorCheck {
                name: "schema_catalogue",
                status: CheckStatus::Pass,
                details: format!("{} document types loaded: {}", ids.len(), ids.join(", ")),
            }
        }
        Err(error) => DoctorCheck {
            name: "schema_catalogue",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_generation_provider(config: &AppConfig) -> DoctorCheck {
    match service_from_config(config) {
        Ok(service) if config.llm.provider == LlmProvider::Stub => DoctorCheck {
            name: "generation_provider",
            status: CheckStatus::Pass,
            details: format!("offline `{}` provider configured", service.name()),
        },
        Ok(service) => DoctorCheck {
            name: "generation_provider",
            status: CheckStatus::Pass,
            details: format!(
                "`{}` provider configured for `{}` (models: {} / {})",
                service.name(),
                config.llm_base_url().unwrap_or_default(),
                config.llm.conversation_model,
                config.llm.drafting_model
            ),
        },
        Err(error) => DoctorCheck {
            name: "generation_provider",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
