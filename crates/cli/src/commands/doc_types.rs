use docwright_core::schemas::{DocTypeSummary, SchemaSource};
use serde::Serialize;

use crate::commands::{load_catalogue, CommandResult};

#[derive(Debug, Serialize)]
struct DocTypesReport {
    command: &'static str,
    directory: String,
    doc_types: Vec<DocTypeSummary>,
}

pub fn run() -> CommandResult {
    let (_, schemas) = match load_catalogue("doc-types") {
        Ok(loaded) => loaded,
        Err(result) => return result,
    };

    CommandResult::success_json(
        "doc-types",
        &DocTypesReport {
            command: "doc-types",
            directory: schemas.directory().display().to_string(),
            doc_types: schemas.list(),
        },
    )
}
