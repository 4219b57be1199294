use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use docwright_agent::AgentRuntime;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub schemas: HealthCheck,
    pub active_sessions: usize,
    pub doc_types: Vec<String>,
    pub checked_at: String,
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { runtime })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let doc_types: Vec<String> =
        state.runtime.doc_types().into_iter().map(|summary| summary.doc_type_id).collect();
    let ready = !doc_types.is_empty();

    let schemas = if ready {
        HealthCheck { status: "ready", detail: format!("{} document types loaded", doc_types.len()) }
    } else {
        HealthCheck { status: "degraded", detail: "no document types loaded".to_string() }
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "docwright-server runtime initialized".to_string(),
        },
        schemas,
        active_sessions: state.runtime.registry().len(),
        doc_types,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}
