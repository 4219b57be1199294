//! Document type catalogue.
//!
//! Schemas are read-only once loaded. `YamlSchemaDirectory` reads one YAML
//! file per document type and resolves each `template` reference against the
//! templates directory; `reload` swaps the whole catalogue at once so readers
//! never observe a half-loaded set.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::domain::schema::{DocumentSchema, SchemaError};

/// Catalogue entry shown to clients choosing a document type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DocTypeSummary {
    pub doc_type_id: String,
    pub display_name: String,
    pub description: String,
    pub total_fields: usize,
    pub required_fields: usize,
}

impl DocTypeSummary {
    pub fn from_schema(schema: &DocumentSchema) -> Self {
        Self {
            doc_type_id: schema.doc_type_id.clone(),
            display_name: schema.display_name().to_string(),
            description: schema.description.clone(),
            total_fields: schema.fields.len(),
            required_fields: schema.required_fields().count(),
        }
    }
}

pub trait SchemaSource: Send + Sync {
    fn get(&self, doc_type_id: &str) -> Result<Arc<DocumentSchema>, SchemaError>;

    fn list(&self) -> Vec<DocTypeSummary>;
}

type Catalogue = BTreeMap<String, Arc<DocumentSchema>>;

#[derive(Debug, Default)]
pub struct InMemorySchemaSource {
    schemas: Catalogue,
}

impl InMemorySchemaSource {
    pub fn new(schemas: impl IntoIterator<Item = DocumentSchema>) -> Result<Self, SchemaError> {
        let mut catalogue = Catalogue::new();
        for schema in schemas {
            schema.validate()?;
            catalogue.insert(schema.doc_type_id.clone(), Arc::new(schema));
        }
        Ok(Self { schemas: catalogue })
    }
}

impl SchemaSource for InMemorySchemaSource {
    fn get(&self, doc_type_id: &str) -> Result<Arc<DocumentSchema>, SchemaError> {
        self.schemas
            .get(doc_type_id)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownDocType(doc_type_id.to_string()))
    }

    fn list(&self) -> Vec<DocTypeSummary> {
        self.schemas.values().map(|schema| DocTypeSummary::from_schema(schema)).collect()
    }
}

#[derive(Debug)]
pub struct YamlSchemaDirectory {
    directory: PathBuf,
    templates_directory: PathBuf,
    schemas: RwLock<Catalogue>,
}

impl YamlSchemaDirectory {
    pub fn load(
        directory: impl Into<PathBuf>,
        templates_directory: impl Into<PathBuf>,
    ) -> Result<Self, SchemaError> {
        let directory = directory.into();
        let templates_directory = templates_directory.into();
        let schemas = read_catalogue(&directory, &templates_directory)?;
        Ok(Self { directory, templates_directory, schemas: RwLock::new(schemas) })
    }

    /// Re-reads the directory. On error the previous catalogue stays in place.
    pub fn reload(&self) -> Result<usize, SchemaError> {
        let fresh = read_catalogue(&self.directory, &self.templates_directory)?;
        let count = fresh.len();
        match self.schemas.write() {
            Ok(mut schemas) => *schemas = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        Ok(count)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn snapshot(&self) -> Catalogue {
        match self.schemas.read() {
            Ok(schemas) => schemas.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl SchemaSource for YamlSchemaDirectory {
    fn get(&self, doc_type_id: &str) -> Result<Arc<DocumentSchema>, SchemaError> {
        self.snapshot()
            .get(doc_type_id)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownDocType(doc_type_id.to_string()))
    }

    fn list(&self) -> Vec<DocTypeSummary> {
        self.snapshot().values().map(|schema| DocTypeSummary::from_schema(schema)).collect()
    }
}

fn load_error(path: &Path, message: impl Into<String>) -> SchemaError {
    SchemaError::Load { path: path.display().to_string(), message: message.into() }
}

fn read_catalogue(directory: &Path, templates_directory: &Path) -> Result<Catalogue, SchemaError> {
    let entries = fs::read_dir(directory).map_err(|error| load_error(directory, error.to_string()))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(path.extension().and_then(|ext| ext.to_str()), Some("yaml" | "yml"))
        })
        .collect();
    paths.sort();

    let mut catalogue = Catalogue::new();
    for path in paths {
        let schema = read_schema(&path, templates_directory)?;
        if catalogue.contains_key(&schema.doc_type_id) {
            return Err(load_error(
                &path,
                format!("document type `{}` is defined more than once", schema.doc_type_id),
            ));
        }
        catalogue.insert(schema.doc_type_id.clone(), Arc::new(schema));
    }
    Ok(catalogue)
}

fn read_schema(path: &Path, templates_directory: &Path) -> Result<DocumentSchema, SchemaError> {
    let raw = fs::read_to_string(path).map_err(|error| load_error(path, error.to_string()))?;
    let mut schema: DocumentSchema =
        serde_yaml::from_str(&raw).map_err(|error| load_error(path, error.to_string()))?;

    if schema.template_text.trim().is_empty() && !schema.template_ref.trim().is_empty() {
        let template_path = templates_directory.join(&schema.template_ref);
        schema.template_text = fs::read_to_string(&template_path)
            .map_err(|error| load_error(&template_path, error.to_string()))?;
    }

    schema.validate()?;
    Ok(schema)
}
