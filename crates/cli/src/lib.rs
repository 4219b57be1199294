pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "docwright",
    about = "Docwright operator CLI",
    long_about = "Inspect docwright configuration, document types and guardrails, and run offline smoke checks.",
    after_help = "Examples:\n  docwright doctor --json\n  docwright doc-types\n  docwright classify \"Should I sign this?\"\n  docwright smoke"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Validate config, schema catalogue and generation provider readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(name = "doc-types", about = "List the document types found in the schema directory")]
    DocTypes,
    #[command(about = "Classify a message with the guardrail table without starting a session")]
    Classify {
        #[arg(help = "Message text to classify")]
        text: String,
        #[arg(long, help = "Layer the phrases of this document type over the built-in rules")]
        doc_type: Option<String>,
    },
    #[command(about = "Run an offline end-to-end session against every document type")]
    Smoke,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::DocTypes => commands::doc_types::run(),
        Command::Classify { text, doc_type } => commands::classify::run(&text, doc_type.as_deref()),
        Command::Smoke => commands::smoke::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
