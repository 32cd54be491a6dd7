//! Inbound quote submissions.
//!
//! - `POST /preventivo` takes a flat JSON object of form fields, renders the quote and
//!   contract, mails them, and answers `{"success": true}` or
//!   `{"success": false, "error": "..."}`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use quotedoc_core::errors::{InterfaceError, PipelineError};
use quotedoc_core::{DispatchOrchestrator, DispatchOutcome, FieldRecord};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct SubmissionState {
    orchestrator: Arc<DispatchOrchestrator>,
}

pub fn router(orchestrator: Arc<DispatchOrchestrator>) -> Router {
    Router::new()
        .route("/preventivo", post(submit_quote))
        .with_state(SubmissionState { orchestrator })
}

pub async fn submit_quote(
    State(state): State<SubmissionState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<DispatchOutcome>) {
    let correlation_id = Uuid::new_v4().to_string();

    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            warn!(
                event_name = "http.preventivo.rejected",
                correlation_id = %correlation_id,
                error = %rejection.body_text(),
                "request body is not valid JSON"
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(DispatchOutcome::failed(rejection.body_text())),
            );
        }
    };

    let result = match FieldRecord::from_json(&payload) {
        Ok(fields) => {
            info!(
                event_name = "http.preventivo.received",
                correlation_id = %correlation_id,
                fields = fields.len(),
                "quote submission received"
            );
            state.orchestrator.run(&fields, &correlation_id).await.map(|_| ())
        }
        Err(error) => Err(PipelineError::from(error)),
    };

    match result {
        Ok(()) => (StatusCode::OK, Json(DispatchOutcome::succeeded())),
        Err(error) => {
            let interface = error.into_interface(correlation_id);
            warn!(
                event_name = "http.preventivo.failed",
                correlation_id = %interface.correlation_id(),
                status = status_for(&interface).as_u16(),
                error = %interface.message(),
                "quote submission failed"
            );
            (status_for(&interface), Json(DispatchOutcome::failed(interface.message())))
        }
    }
}

fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } | InterfaceError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use quotedoc_core::config::TemplatesConfig;
    use quotedoc_core::testing::{RecordingMailSender, RecordingTemplateStore};
    use quotedoc_core::{
        DispatchOptions, DispatchOrchestrator, DispatchOutcome, MessageComposer, TemplateRegistry,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::routes::router;

    fn templates() -> TemplatesConfig {
        TemplatesConfig {
            quote_private: "tpl-qp".to_string(),
            quote_business: "tpl-qb".to_string(),
            contract_private_car: "tpl-cpc".to_string(),
            contract_private_van: "tpl-cpv".to_string(),
            contract_business_car: "tpl-cbc".to_string(),
            contract_business_van: "tpl-cbv".to_string(),
        }
    }

    fn store() -> RecordingTemplateStore {
        ["tpl-qp", "tpl-qb", "tpl-cpc", "tpl-cpv", "tpl-cbc", "tpl-cbv"]
            .into_iter()
            .fold(RecordingTemplateStore::new(), |store, id| {
                store.with_template(id, "{{numero-preventivo}} {{preventivo}}")
            })
    }

    fn app(
        store: &Arc<RecordingTemplateStore>,
        sender: &Arc<RecordingMailSender>,
    ) -> axum::Router {
        let registry = TemplateRegistry::from_config(&templates()).expect("registry");
        let orchestrator = DispatchOrchestrator::new(
            Arc::new(registry),
            store.clone(),
            sender.clone(),
            MessageComposer::new("ops@x.test").expect("composer"),
            DispatchOptions {
                call_timeout: Duration::from_millis(200),
                ..DispatchOptions::default()
            },
        );
        router(Arc::new(orchestrator))
    }

    async fn post(app: axum::Router, body: &str) -> (StatusCode, DispatchOutcome) {
        let request = Request::builder()
            .method("POST")
            .uri("/preventivo")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let outcome: DispatchOutcome = serde_json::from_slice(&bytes).expect("json outcome");
        (status, outcome)
    }

    #[tokio::test]
    async fn valid_submission_returns_success_and_sends_both_messages() {
        let store = Arc::new(store());
        let sender = Arc::new(RecordingMailSender::new());
        let body = json!({
            "cliente-tipo": "Azienda",
            "veicolo": "Auto",
            "email": "a@x.test",
            "preventivo": "500",
            "numero-preventivo": 42
        });

        let (status, outcome) = post(app(&store, &sender), &body.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome, DispatchOutcome::succeeded());
        assert_eq!(sender.sent().len(), 2);
        assert!(store.live_copies().is_empty());
    }

    #[tokio::test]
    async fn success_body_has_no_error_key() {
        let store = Arc::new(store());
        let sender = Arc::new(RecordingMailSender::new());
        let request = Request::builder()
            .method("POST")
            .uri("/preventivo")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"email":"a@x.test"}"#))
            .expect("request");

        let response = app(&store, &sender).oneshot(request).await.expect("response");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value: Value = serde_json::from_slice(&bytes).expect("json");

        assert_eq!(value, json!({ "success": true }));
    }

    #[tokio::test]
    async fn unknown_customer_category_is_a_bad_request() {
        let store = Arc::new(store());
        let sender = Arc::new(RecordingMailSender::new());

        let (status, outcome) =
            post(app(&store, &sender), r#"{"cliente-tipo":"Ente","email":"a@x.test"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!outcome.success);
        assert!(outcome.error.expect("error").contains("Ente"));
        assert!(store.calls().is_empty());
        assert_eq!(sender.attempts(), 0);
    }

    #[tokio::test]
    async fn non_object_body_is_a_bad_request() {
        let store = Arc::new(store());
        let sender = Arc::new(RecordingMailSender::new());

        let (status, outcome) = post(app(&store, &sender), r#"["not","an","object"]"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(outcome.error.as_deref(), Some("request body must be a JSON object"));
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let store = Arc::new(store());
        let sender = Arc::new(RecordingMailSender::new());

        let (status, outcome) = post(app(&store, &sender), "{not json").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn export_failure_returns_server_error_without_sending() {
        let store = Arc::new(store().fail_export_of("tpl-cbc"));
        let sender = Arc::new(RecordingMailSender::new());
        let body = r#"{"cliente-tipo":"Azienda","veicolo":"auto","email":"a@x.test"}"#;

        let (status, outcome) = post(app(&store, &sender), body).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!outcome.success);
        assert!(outcome.error.expect("error").contains("contract render failed"));
        assert_eq!(sender.attempts(), 0);
        assert!(store.live_copies().is_empty());
    }

    #[tokio::test]
    async fn missing_customer_email_is_a_bad_request() {
        let store = Arc::new(store());
        let sender = Arc::new(RecordingMailSender::new());

        let (status, outcome) = post(app(&store, &sender), r#"{"cliente-tipo":"Privato"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(outcome.error.expect("error").contains("customer"));
        assert_eq!(sender.attempts(), 0);
    }
}
