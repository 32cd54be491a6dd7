use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use quotedoc_core::{DispatchOrchestrator, FailureAggregation, RenderScheduling};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    orchestrator: Arc<DispatchOrchestrator>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchedulingReport {
    pub render_scheduling: RenderScheduling,
    pub failure_aggregation: FailureAggregation,
    pub call_timeout_ms: u128,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub templates: HealthCheck,
    pub scheduling: SchedulingReport,
    pub checked_at: String,
}

pub fn router(orchestrator: Arc<DispatchOrchestrator>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { orchestrator })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let templates = registry_check(&state.orchestrator);
    let ready = templates.status == "ready";
    let options = state.orchestrator.options();

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "quotedoc-server runtime initialized".to_string(),
        },
        templates,
        scheduling: SchedulingReport {
            render_scheduling: options.scheduling,
            failure_aggregation: options.aggregation,
            call_timeout_ms: options.call_timeout.as_millis(),
        },
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn registry_check(orchestrator: &DispatchOrchestrator) -> HealthCheck {
    let missing = orchestrator.registry().missing_keys();
    if missing.is_empty() {
        HealthCheck {
            status: "ready",
            detail: format!("{} templates registered", orchestrator.registry().len()),
        }
    } else {
        let keys = missing.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        HealthCheck { status: "degraded", detail: format!("missing templates: {keys}") }
    }
}
