//! Template store over Google Drive v3 and Google Docs v1.
//!
//! Working copies are created inside a shared-drive folder, so every Drive call that
//! addresses a file passes `supportsAllDrives=true`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quotedoc_core::config::{OAuthConfig, StoreConfig};
use quotedoc_core::domain::document::TemplateId;
use quotedoc_core::errors::StoreError;
use quotedoc_core::render::{Replacement, TemplateStore, WorkingCopyId};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::auth::{store_token_source, AuthError, TokenSource};

const PDF_MIME_TYPE: &str = "application/pdf";
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum GoogleApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("could not build HTTP client: {0}")]
    Client(String),
    #[error("{endpoint} request failed: {message}")]
    Transport { endpoint: &'static str, message: String },
    #[error("{endpoint} returned {status} for `{resource}`: {message}")]
    Status { endpoint: &'static str, resource: String, status: u16, message: String },
    #[error("{endpoint} response could not be decoded: {message}")]
    Decode { endpoint: &'static str, message: String },
}

impl From<GoogleApiError> for StoreError {
    fn from(error: GoogleApiError) -> Self {
        match error {
            GoogleApiError::Auth(error) => StoreError::Unauthorized(error.to_string()),
            GoogleApiError::Status { resource, status: 404, .. } => StoreError::NotFound(resource),
            GoogleApiError::Status { status: status @ (401 | 403), message, .. } => {
                StoreError::Unauthorized(format!("{status}: {message}"))
            }
            GoogleApiError::Status { status, message, .. } => StoreError::Remote { status, message },
            other @ (GoogleApiError::Client(_)
            | GoogleApiError::Transport { .. }
            | GoogleApiError::Decode { .. }) => StoreError::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CopiedFile {
    id: String,
}

pub struct GoogleTemplateStore {
    client: Client,
    drive_base_url: String,
    docs_base_url: String,
    workspace_folder_id: String,
    tokens: Arc<dyn TokenSource>,
}

impl GoogleTemplateStore {
    pub fn new(client: Client, config: &StoreConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            drive_base_url: config.drive_base_url.trim_end_matches('/').to_string(),
            docs_base_url: config.docs_base_url.trim_end_matches('/').to_string(),
            workspace_folder_id: config.workspace_folder_id.clone(),
            tokens,
        }
    }

    /// Builds the HTTP client and token source described by `store` and `oauth`.
    pub fn from_config(store: &StoreConfig, oauth: &OAuthConfig) -> Result<Self, GoogleApiError> {
        let client = http_client(Duration::from_secs(store.timeout_secs))?;
        let tokens = store_token_source(client.clone(), store, oauth)?;
        Ok(Self::new(client, store, tokens))
    }

    pub fn workspace_folder_id(&self) -> &str {
        &self.workspace_folder_id
    }

    pub async fn copy_document(
        &self,
        template_id: &str,
        name: &str,
    ) -> Result<String, GoogleApiError> {
        let endpoint = "drive.files.copy";
        let url = format!("{}/files/{template_id}/copy", self.drive_base_url);
        let request = self
            .client
            .post(url)
            .query(&[("supportsAllDrives", "true")])
            .json(&copy_request_body(name, &self.workspace_folder_id));

        let response = self.send(endpoint, template_id, request).await?;
        let copied: CopiedFile = response.json().await.map_err(|error| GoogleApiError::Decode {
            endpoint,
            message: error.to_string(),
        })?;
        Ok(copied.id)
    }

    pub async fn replace_all_text(
        &self,
        document_id: &str,
        replacements: &[Replacement],
    ) -> Result<(), GoogleApiError> {
        let url = format!("{}/documents/{document_id}:batchUpdate", self.docs_base_url);
        let request = self.client.post(url).json(&batch_update_body(replacements));
        self.send("docs.documents.batchUpdate", document_id, request).await?;
        Ok(())
    }

    pub async fn export_pdf_bytes(&self, document_id: &str) -> Result<Vec<u8>, GoogleApiError> {
        let endpoint = "drive.files.export";
        let url = format!("{}/files/{document_id}/export", self.drive_base_url);
        let request = self.client.get(url).query(&[("mimeType", PDF_MIME_TYPE)]);

        let response = self.send(endpoint, document_id, request).await?;
        let bytes = response.bytes().await.map_err(|error| GoogleApiError::Decode {
            endpoint,
            message: error.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), GoogleApiError> {
        let url = format!("{}/files/{file_id}", self.drive_base_url);
        let request = self.client.delete(url).query(&[("supportsAllDrives", "true")]);
        self.send("drive.files.delete", file_id, request).await?;
        Ok(())
    }

    async fn send(
        &self,
        endpoint: &'static str,
        resource: &str,
        request: RequestBuilder,
    ) -> Result<Response, GoogleApiError> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|error| GoogleApiError::Transport { endpoint, message: error.to_string() })?;

        let status = response.status();
        debug!(event_name = "store.http.response", endpoint, resource, status = status.as_u16());
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(GoogleApiError::Status {
            endpoint,
            resource: resource.to_string(),
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }
}

#[async_trait]
impl TemplateStore for GoogleTemplateStore {
    async fn copy(
        &self,
        template_id: &TemplateId,
        name: &str,
    ) -> Result<WorkingCopyId, StoreError> {
        let id = self.copy_document(template_id.as_str(), name).await?;
        Ok(WorkingCopyId(id))
    }

    async fn batch_replace_text(
        &self,
        copy: &WorkingCopyId,
        replacements: &[Replacement],
    ) -> Result<(), StoreError> {
        Ok(self.replace_all_text(copy.as_str(), replacements).await?)
    }

    async fn export_pdf(&self, copy: &WorkingCopyId) -> Result<Vec<u8>, StoreError> {
        Ok(self.export_pdf_bytes(copy.as_str()).await?)
    }

    async fn delete(&self, copy: &WorkingCopyId) -> Result<(), StoreError> {
        Ok(self.delete_file(copy.as_str()).await?)
    }
}

pub fn http_client(timeout: Duration) -> Result<Client, GoogleApiError> {
    Client::builder().timeout(timeout).build().map_err(|error| GoogleApiError::Client(error.to_string()))
}

fn copy_request_body(name: &str, folder_id: &str) -> Value {
    json!({ "name": name, "parents": [folder_id] })
}

/// One `replaceAllText` request per replacement, matching case.
fn batch_update_body(replacements: &[Replacement]) -> Value {
    let requests: Vec<Value> = replacements
        .iter()
        .map(|replacement| {
            json!({
                "replaceAllText": {
                    "containsText": { "text": replacement.token, "matchCase": true },
                    "replaceText": replacement.text,
                }
            })
        })
        .collect();
    json!({ "requests": requests })
}

/// Google error payloads carry `error.message`; fall back to the raw body.
fn error_message(status: StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|value| value.pointer("/error/message"))
        .and_then(Value::as_str)
        .map(str::to_string);

    match message {
        Some(message) => message,
        None if body.trim().is_empty() => {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        }
        None => body.chars().take(MAX_ERROR_BODY).collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mockito::Matcher;
    use quotedoc_core::config::AppConfig;
    use quotedoc_core::domain::document::TemplateId;
    use quotedoc_core::errors::StoreError;
    use quotedoc_core::render::{Replacement, TemplateStore, WorkingCopyId};
    use reqwest::{Client, StatusCode};
    use serde_json::json;

    use super::{batch_update_body, error_message, GoogleTemplateStore};
    use crate::auth::StaticTokenSource;

    fn store_for(server: &mockito::Server) -> GoogleTemplateStore {
        let mut config = AppConfig::default().store;
        config.drive_base_url = format!("{}/drive/v3", server.url());
        config.docs_base_url = format!("{}/v1/", server.url());
        config.workspace_folder_id = "shared-folder".to_string();
        let tokens = Arc::new(StaticTokenSource::new("ya29.test".to_string().into()));
        GoogleTemplateStore::new(Client::new(), &config, tokens)
    }

    #[test]
    fn batch_update_matches_case_for_every_token() {
        let body = batch_update_body(&[
            Replacement { token: "{{email}}".to_string(), text: "a@x.test".to_string() },
            Replacement { token: "{{km-extra}}".to_string(), text: String::new() },
        ]);

        assert_eq!(
            body,
            json!({
                "requests": [
                    { "replaceAllText": {
                        "containsText": { "text": "{{email}}", "matchCase": true },
                        "replaceText": "a@x.test" } },
                    { "replaceAllText": {
                        "containsText": { "text": "{{km-extra}}", "matchCase": true },
                        "replaceText": "" } },
                ]
            })
        );
    }

    #[test]
    fn error_message_prefers_google_error_payload() {
        let body = r#"{"error":{"code":404,"message":"File not found: tpl.","status":"NOT_FOUND"}}"#;
        assert_eq!(error_message(StatusCode::NOT_FOUND, body), "File not found: tpl.");
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, ""), "Bad Gateway");
        assert_eq!(error_message(StatusCode::INTERNAL_SERVER_ERROR, "oops"), "oops");
    }

    #[tokio::test]
    async fn copy_targets_the_shared_workspace_folder() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/drive/v3/files/tpl-quote/copy")
            .match_query(Matcher::UrlEncoded("supportsAllDrives".into(), "true".into()))
            .match_header("authorization", "Bearer ya29.test")
            .match_body(Matcher::Json(json!({
                "name": "temp_1_abc",
                "parents": ["shared-folder"],
            })))
            .with_status(200)
            .with_body(r#"{"id":"copy-123","name":"temp_1_abc"}"#)
            .create_async()
            .await;

        let copy = store_for(&server)
            .copy(&TemplateId::new("tpl-quote"), "temp_1_abc")
            .await
            .expect("copy succeeds");

        assert_eq!(copy, WorkingCopyId("copy-123".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn substitution_is_one_batch_update_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/documents/copy-123:batchUpdate")
            .match_body(Matcher::PartialJson(json!({
                "requests": [{ "replaceAllText": {
                    "containsText": { "text": "{{preventivo}}", "matchCase": true },
                    "replaceText": "500" } }]
            })))
            .with_status(200)
            .with_body(r#"{"documentId":"copy-123","replies":[{}]}"#)
            .expect(1)
            .create_async()
            .await;

        store_for(&server)
            .batch_replace_text(
                &WorkingCopyId("copy-123".to_string()),
                &[Replacement { token: "{{preventivo}}".to_string(), text: "500".to_string() }],
            )
            .await
            .expect("batch update succeeds");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn export_returns_raw_pdf_bytes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/drive/v3/files/copy-123/export")
            .match_query(Matcher::UrlEncoded("mimeType".into(), "application/pdf".into()))
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body(b"%PDF-1.4 test".to_vec())
            .create_async()
            .await;

        let pdf = store_for(&server)
            .export_pdf(&WorkingCopyId("copy-123".to_string()))
            .await
            .expect("export succeeds");

        assert_eq!(pdf, b"%PDF-1.4 test".to_vec());
    }

    #[tokio::test]
    async fn delete_addresses_shared_drive_files() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/drive/v3/files/copy-123")
            .match_query(Matcher::UrlEncoded("supportsAllDrives".into(), "true".into()))
            .with_status(204)
            .create_async()
            .await;

        store_for(&server)
            .delete(&WorkingCopyId("copy-123".to_string()))
            .await
            .expect("delete succeeds");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_template_maps_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/drive/v3/files/tpl-gone/copy")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error":{"code":404,"message":"File not found: tpl-gone."}}"#)
            .create_async()
            .await;

        let error = store_for(&server)
            .copy(&TemplateId::new("tpl-gone"), "temp")
            .await
            .expect_err("template is missing");

        assert_eq!(error, StoreError::NotFound("tpl-gone".to_string()));
    }

    #[tokio::test]
    async fn forbidden_maps_to_unauthorized_and_server_errors_to_remote() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/drive/v3/files/copy-403/export")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":{"message":"The caller does not have permission"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/drive/v3/files/copy-500/export")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body(r#"{"error":{"message":"Internal error"}}"#)
            .create_async()
            .await;
        let store = store_for(&server);

        let forbidden = store
            .export_pdf(&WorkingCopyId("copy-403".to_string()))
            .await
            .expect_err("forbidden");
        let failed = store
            .export_pdf(&WorkingCopyId("copy-500".to_string()))
            .await
            .expect_err("server error");

        assert_eq!(
            forbidden,
            StoreError::Unauthorized("403: The caller does not have permission".to_string())
        );
        assert_eq!(
            failed,
            StoreError::Remote { status: 500, message: "Internal error".to_string() }
        );
    }
}
