//! Dispatch orchestration
//!
//! One request runs: resolve both templates, render the quote and the contract,
//! compose the customer and internal messages, then send customer before internal.
//! Any failure other than a cleanup warning aborts the remaining steps.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ConfigError;
use crate::domain::document::{DocumentType, TemplateId, VehicleVariant};
use crate::domain::fields::{Field, FieldRecord};
use crate::errors::{CleanupWarning, DispatchError, PipelineError};
use crate::mail::{Audience, MailSender, MessageComposer, OutboundMessage};
use crate::registry::TemplateRegistry;
use crate::render::{DocumentRenderer, RenderedDocument, TemplateStore};
use crate::retry::RetryPolicy;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderScheduling {
    /// Quote first, contract second.
    #[default]
    Sequential,
    /// Both renders in flight at once; both always run to completion.
    Concurrent,
}

impl RenderScheduling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Concurrent => "concurrent",
        }
    }
}

impl fmt::Display for RenderScheduling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RenderScheduling {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "concurrent" => Ok(Self::Concurrent),
            other => Err(ConfigError::Validation(format!(
                "unsupported render scheduling `{other}` (expected sequential|concurrent)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureAggregation {
    /// Report the first render failure.
    #[default]
    FailFast,
    /// Run every render and report all failures together.
    CollectAll,
}

impl FailureAggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailFast => "fail_fast",
            Self::CollectAll => "collect_all",
        }
    }
}

impl fmt::Display for FailureAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureAggregation {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "collect_all" => Ok(Self::CollectAll),
            other => Err(ConfigError::Validation(format!(
                "unsupported failure aggregation `{other}` (expected fail_fast|collect_all)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchOptions {
    pub scheduling: RenderScheduling,
    pub aggregation: FailureAggregation,
    /// Upper bound for every single store or mail call.
    pub call_timeout: Duration,
    pub render_retry: RetryPolicy,
    pub send_retry: RetryPolicy,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            scheduling: RenderScheduling::default(),
            aggregation: FailureAggregation::default(),
            call_timeout: Duration::from_secs(30),
            render_retry: RetryPolicy::none(),
            send_retry: RetryPolicy::none(),
        }
    }
}

/// Caller-facing result of one request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn succeeded() -> Self {
        Self { success: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

/// Details of a completed run, for logs and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    pub correlation_id: String,
    pub quote_template: TemplateId,
    pub contract_template: TemplateId,
    pub cleanup_warnings: Vec<CleanupWarning>,
    pub messages_sent: Vec<Audience>,
}

pub struct DispatchOrchestrator {
    registry: Arc<TemplateRegistry>,
    renderer: DocumentRenderer,
    sender: Arc<dyn MailSender>,
    composer: MessageComposer,
    options: DispatchOptions,
}

impl DispatchOrchestrator {
    pub fn new(
        registry: Arc<TemplateRegistry>,
        store: Arc<dyn TemplateStore>,
        sender: Arc<dyn MailSender>,
        composer: MessageComposer,
        options: DispatchOptions,
    ) -> Self {
        let renderer = DocumentRenderer::new(store, options.call_timeout);
        Self { registry, renderer, sender, composer, options }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    pub async fn handle(&self, fields: &FieldRecord) -> DispatchOutcome {
        let correlation_id = Uuid::new_v4().to_string();
        match self.run(fields, &correlation_id).await {
            Ok(_) => DispatchOutcome::succeeded(),
            Err(error) => DispatchOutcome::failed(error.to_string()),
        }
    }

    pub async fn run(
        &self,
        fields: &FieldRecord,
        correlation_id: &str,
    ) -> Result<DispatchReport, PipelineError> {
        let result = self.execute(fields, correlation_id).await;
        match &result {
            Ok(report) => info!(
                event_name = "dispatch.completed",
                correlation_id = %correlation_id,
                cleanup_warnings = report.cleanup_warnings.len(),
                "documents generated and delivered"
            ),
            Err(error) => warn!(
                event_name = "dispatch.failed",
                correlation_id = %correlation_id,
                retryable = error.is_retryable(),
                error = %error,
                "dispatch aborted"
            ),
        }
        result
    }

    async fn execute(
        &self,
        fields: &FieldRecord,
        correlation_id: &str,
    ) -> Result<DispatchReport, PipelineError> {
        let category = fields.customer_category()?;
        let descriptor = fields.get(Field::Vehicle);
        if !VehicleVariant::is_recognized_descriptor(descriptor) {
            warn!(
                event_name = "dispatch.vehicle.unrecognized",
                correlation_id = %correlation_id,
                descriptor = %descriptor,
                "unrecognized vehicle descriptor, using the van contract"
            );
        }
        let variant = fields.vehicle_variant();

        let quote_template =
            self.registry.resolve(DocumentType::Quote, category, Some(variant))?.clone();
        let contract_template =
            self.registry.resolve(DocumentType::Contract, category, Some(variant))?.clone();
        info!(
            event_name = "dispatch.templates.resolved",
            correlation_id = %correlation_id,
            customer_category = %category,
            vehicle_variant = %variant,
            quote_template = %quote_template,
            contract_template = %contract_template,
            "templates resolved"
        );

        let (quote, contract) =
            self.render_documents(&quote_template, &contract_template, fields).await?;
        let cleanup_warnings: Vec<CleanupWarning> = [&quote, &contract]
            .into_iter()
            .filter_map(|document| document.cleanup_warning.clone())
            .collect();

        let customer =
            self.composer.customer_message(fields, &quote, Utc::now().timestamp_millis())?;
        let internal = self.composer.internal_message(
            fields,
            [&quote, &contract],
            Utc::now().timestamp_millis(),
        )?;

        let mut messages_sent = Vec::with_capacity(2);
        for message in [&customer, &internal] {
            self.deliver(message).await?;
            info!(
                event_name = "dispatch.message.sent",
                correlation_id = %correlation_id,
                audience = %message.audience,
                attachments = message.attachments.len(),
                "message sent"
            );
            messages_sent.push(message.audience);
        }

        Ok(DispatchReport {
            correlation_id: correlation_id.to_string(),
            quote_template,
            contract_template,
            cleanup_warnings,
            messages_sent,
        })
    }

    async fn render_documents(
        &self,
        quote_template: &TemplateId,
        contract_template: &TemplateId,
        fields: &FieldRecord,
    ) -> Result<(RenderedDocument, RenderedDocument), PipelineError> {
        let quote = self.render_one(DocumentType::Quote, quote_template, fields);
        let contract = self.render_one(DocumentType::Contract, contract_template, fields);

        match (self.options.scheduling, self.options.aggregation) {
            (RenderScheduling::Sequential, FailureAggregation::FailFast) => {
                let quote = quote.await?;
                let contract = contract.await?;
                Ok((quote, contract))
            }
            (RenderScheduling::Sequential, FailureAggregation::CollectAll) => {
                let quote = quote.await;
                let contract = contract.await;
                self.aggregate(quote, contract)
            }
            (RenderScheduling::Concurrent, _) => {
                let (quote, contract) = tokio::join!(quote, contract);
                self.aggregate(quote, contract)
            }
        }
    }

    fn aggregate(
        &self,
        quote: Result<RenderedDocument, PipelineError>,
        contract: Result<RenderedDocument, PipelineError>,
    ) -> Result<(RenderedDocument, RenderedDocument), PipelineError> {
        match (quote, contract) {
            (Ok(quote), Ok(contract)) => Ok((quote, contract)),
            (Err(error), Ok(_)) | (Ok(_), Err(error)) => Err(error),
            (Err(first), Err(second)) => match self.options.aggregation {
                FailureAggregation::FailFast => Err(first),
                FailureAggregation::CollectAll => Err(PipelineError::Multiple(vec![first, second])),
            },
        }
    }

    async fn render_one(
        &self,
        document_type: DocumentType,
        template_id: &TemplateId,
        fields: &FieldRecord,
    ) -> Result<RenderedDocument, PipelineError> {
        let renderer = &self.renderer;
        self.options
            .render_retry
            .run(document_type.as_str(), move |_| {
                renderer.render(document_type, template_id, fields)
            })
            .await
            .map_err(|source| PipelineError::Render { document: document_type, source })
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<(), DispatchError> {
        let sender = &self.sender;
        let after = self.options.call_timeout;
        let audience = message.audience;
        self.options
            .send_retry
            .run(audience.as_str(), move |_| async move {
                match tokio::time::timeout(after, sender.send(message)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(source)) => Err(DispatchError::Send { audience, source }),
                    Err(_) => Err(DispatchError::Timeout { audience, after }),
                }
            })
            .await
    }
}
