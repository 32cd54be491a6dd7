//! Document rendering
//!
//! A render copies a remote template into a working copy, substitutes every known
//! placeholder in one batch, exports the result as PDF and deletes the working copy.
//! The working copy is owned by a guard so it is released on every exit path,
//! including cancellation of the render future.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::document::{DocumentType, TemplateId};
use crate::domain::fields::{Field, FieldRecord};
use crate::errors::{CleanupWarning, RenderError, RenderStage, StoreError};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkingCopyId(pub String);

impl WorkingCopyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkingCopyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replace every occurrence of `token` with `text`, matching case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replacement {
    pub token: String,
    pub text: String,
}

/// Remote document storage and editing capability.
///
/// Implementations must work on documents that live in a shared workspace rather than
/// in a per-user private area.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn copy(&self, template_id: &TemplateId, name: &str)
        -> Result<WorkingCopyId, StoreError>;

    /// Applies all replacements as one atomic batch.
    async fn batch_replace_text(
        &self,
        copy: &WorkingCopyId,
        replacements: &[Replacement],
    ) -> Result<(), StoreError>;

    async fn export_pdf(&self, copy: &WorkingCopyId) -> Result<Vec<u8>, StoreError>;

    async fn delete(&self, copy: &WorkingCopyId) -> Result<(), StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedDocument {
    pub document_type: DocumentType,
    pub template_id: TemplateId,
    pub pdf: Vec<u8>,
    pub cleanup_warning: Option<CleanupWarning>,
}

/// One replacement per placeholder in the fixed set; absent fields become empty.
pub fn placeholder_replacements(fields: &FieldRecord) -> Vec<Replacement> {
    Field::ALL
        .into_iter()
        .map(|field| Replacement { token: field.placeholder(), text: fields.get(field).to_string() })
        .collect()
}

/// Traceable, collision-resistant name for a new working copy.
pub fn working_copy_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("temp_{}_{}", Utc::now().timestamp_millis(), &suffix[..8])
}

#[derive(Clone)]
pub struct DocumentRenderer {
    store: Arc<dyn TemplateStore>,
    call_timeout: Duration,
}

impl DocumentRenderer {
    pub fn new(store: Arc<dyn TemplateStore>, call_timeout: Duration) -> Self {
        Self { store, call_timeout }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub async fn render(
        &self,
        document_type: DocumentType,
        template_id: &TemplateId,
        fields: &FieldRecord,
    ) -> Result<RenderedDocument, RenderError> {
        let name = working_copy_name();
        let copy_id = self
            .bounded(RenderStage::Acquire, self.store.copy(template_id, &name))
            .await?
            .map_err(|source| RenderError::Acquire {
                template_id: template_id.to_string(),
                source,
            })?;

        debug!(
            event_name = "render.working_copy.acquired",
            document = %document_type,
            template_id = %template_id,
            working_copy = %copy_id,
            name = %name,
            "working copy created"
        );

        let guard = WorkingCopyGuard::new(Arc::clone(&self.store), copy_id.clone());
        let outcome = self.fill_and_export(&copy_id, fields).await;
        let released = guard.release(self.call_timeout).await;

        match (outcome, released) {
            (Ok(pdf), Ok(())) => {
                info!(
                    event_name = "render.completed",
                    document = %document_type,
                    template_id = %template_id,
                    size = pdf.len(),
                    "document rendered"
                );
                Ok(RenderedDocument {
                    document_type,
                    template_id: template_id.clone(),
                    pdf,
                    cleanup_warning: None,
                })
            }
            (Ok(pdf), Err(warning)) => {
                warn!(
                    event_name = "render.cleanup_warning",
                    document = %document_type,
                    template_id = %template_id,
                    warning = %warning,
                    "document rendered but working copy was not deleted"
                );
                Ok(RenderedDocument {
                    document_type,
                    template_id: template_id.clone(),
                    pdf,
                    cleanup_warning: Some(warning),
                })
            }
            (Err(error), released) => {
                if let Err(warning) = released {
                    warn!(
                        event_name = "render.cleanup_warning",
                        document = %document_type,
                        template_id = %template_id,
                        warning = %warning,
                        "working copy was not deleted after a failed render"
                    );
                }
                warn!(
                    event_name = "render.failed",
                    document = %document_type,
                    template_id = %template_id,
                    error = %error,
                    "document render failed"
                );
                Err(error)
            }
        }
    }

    async fn fill_and_export(
        &self,
        copy_id: &WorkingCopyId,
        fields: &FieldRecord,
    ) -> Result<Vec<u8>, RenderError> {
        let replacements = placeholder_replacements(fields);
        self.bounded(
            RenderStage::Substitute,
            self.store.batch_replace_text(copy_id, &replacements),
        )
        .await?
        .map_err(RenderError::Substitute)?;

        self.bounded(RenderStage::Export, self.store.export_pdf(copy_id))
            .await?
            .map_err(RenderError::Export)
    }

    async fn bounded<T>(
        &self,
        stage: RenderStage,
        call: impl Future<Output = T>,
    ) -> Result<T, RenderError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| RenderError::Timeout { stage, after: self.call_timeout })
    }
}

/// Owns a working copy until it is released. Dropping an unreleased guard (for
/// example when the render future is cancelled) schedules the deletion on the
/// current runtime.
struct WorkingCopyGuard {
    store: Arc<dyn TemplateStore>,
    id: Option<WorkingCopyId>,
}

impl WorkingCopyGuard {
    fn new(store: Arc<dyn TemplateStore>, id: WorkingCopyId) -> Self {
        Self { store, id: Some(id) }
    }

    async fn release(mut self, timeout: Duration) -> Result<(), CleanupWarning> {
        let Some(id) = self.id.clone() else {
            return Ok(());
        };

        let result = match tokio::time::timeout(timeout, self.store.delete(&id)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(error.to_string()),
            Err(_) => Err(format!(
                "{} step timed out after {}ms",
                RenderStage::Release,
                timeout.as_millis()
            )),
        };
        self.id = None;

        match result {
            Ok(()) => {
                debug!(
                    event_name = "render.working_copy.released",
                    working_copy = %id,
                    "working copy deleted"
                );
                Ok(())
            }
            Err(reason) => Err(CleanupWarning { working_copy: id.0, reason }),
        }
    }
}

impl Drop for WorkingCopyGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                handle.spawn(async move {
                    if let Err(error) = store.delete(&id).await {
                        warn!(
                            event_name = "render.cleanup_warning",
                            working_copy = %id,
                            error = %error,
                            "background deletion of abandoned working copy failed"
                        );
                    }
                });
            }
            Err(_) => warn!(
                event_name = "render.cleanup_warning",
                working_copy = %id,
                "working copy abandoned outside a runtime and was not deleted"
            ),
        }
    }
}
