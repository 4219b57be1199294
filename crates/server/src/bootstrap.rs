use std::sync::Arc;

use docwright_agent::audit::TracingAuditSink;
use docwright_agent::generation::service_from_config;
use docwright_agent::{AgentRuntime, GenerationError, RuntimeSettings};
use docwright_core::config::{AppConfig, ConfigError};
use docwright_core::domain::schema::SchemaError;
use docwright_core::schemas::{SchemaSource, YamlSchemaDirectory};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub schemas: Arc<YamlSchemaDirectory>,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("document schemas failed to load: {0}")]
    Schemas(#[source] SchemaError),
    #[error("generation service could not be configured: {0}")]
    Generation(#[source] GenerationError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        "starting application bootstrap"
    );

    let schemas = Arc::new(
        YamlSchemaDirectory::load(
            &config.schemas.directory,
            &config.schemas.templates_directory,
        )
        .map_err(BootstrapError::Schemas)?,
    );
    info!(
        event_name = "system.bootstrap.schemas_loaded",
        correlation_id = "bootstrap",
        directory = %config.schemas.directory.display(),
        doc_types = schemas.list().len(),
        "document schemas loaded"
    );

    let service = service_from_config(&config).map_err(BootstrapError::Generation)?;
    info!(
        event_name = "system.bootstrap.generation_ready",
        correlation_id = "bootstrap",
        service = service.name(),
        "generation service configured"
    );

    let runtime = AgentRuntime::new(
        Arc::clone(&schemas) as Arc<dyn SchemaSource>,
        service,
        Arc::new(TracingAuditSink),
        RuntimeSettings::from_config(&config),
    );

    Ok(Application { config, schemas, runtime: Arc::new(runtime) })
}
