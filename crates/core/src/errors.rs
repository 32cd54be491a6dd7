use std::time::Duration;

use thiserror::Error;

use crate::domain::document::{DocumentType, TemplateKey};
use crate::mail::Audience;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("field `{key}` must be a string, number, or boolean")]
    UnsupportedValue { key: String },
    #[error("unsupported customer category `{0}` (expected Privato|Azienda)")]
    UnknownCustomerCategory(String),
}

/// Deployment defect: the registry cannot answer a lookup it should always answer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no template registered for `{key}`")]
    UnresolvedTemplate { key: TemplateKey },
    #[error("contract template lookup requires a vehicle variant")]
    MissingVehicleVariant,
    #[error("template `{key}` is configured with an empty identifier")]
    EmptyTemplateId { key: TemplateKey },
    #[error("templates `{first}` and `{second}` share the identifier `{template_id}`")]
    DuplicateTemplateId { first: TemplateKey, second: TemplateKey, template_id: String },
    #[error("mail templates failed to load: {0}")]
    MailTemplate(String),
}

/// Failure reported by a template store implementation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("remote document `{0}` was not found")]
    NotFound(String),
    #[error("remote store returned {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("remote store request failed: {0}")]
    Transport(String),
    #[error("remote store authorization failed: {0}")]
    Unauthorized(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderStage {
    Acquire,
    Substitute,
    Export,
    Release,
}

impl RenderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Substitute => "substitute",
            Self::Export => "export",
            Self::Release => "release",
        }
    }
}

impl std::fmt::Display for RenderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("could not copy template `{template_id}`: {source}")]
    Acquire { template_id: String, source: StoreError },
    #[error("placeholder substitution failed: {0}")]
    Substitute(#[source] StoreError),
    #[error("PDF export failed: {0}")]
    Export(#[source] StoreError),
    #[error("{stage} step timed out after {}ms", .after.as_millis())]
    Timeout { stage: RenderStage, after: Duration },
}

/// Working copy deletion failed after the PDF was already exported.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("working copy `{working_copy}` was not deleted: {reason}")]
pub struct CleanupWarning {
    pub working_copy: String,
    pub reason: String,
}

/// Failure reported by a mail sender implementation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MailError {
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("message could not be built: {0}")]
    Build(String),
    #[error("mail credentials unavailable: {0}")]
    Credentials(String),
    #[error("mail transport failed: {0}")]
    Transport(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{audience} message has no recipient address")]
    MissingRecipient { audience: Audience },
    #[error("{audience} message could not be composed: {reason}")]
    Compose { audience: Audience, reason: String },
    #[error("sending {audience} message failed: {source}")]
    Send { audience: Audience, source: MailError },
    #[error("sending {audience} message timed out after {}ms", .after.as_millis())]
    Timeout { audience: Audience, after: Duration },
}

/// Terminal error of one pipeline run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("{document} render failed: {source}")]
    Render { document: DocumentType, source: RenderError },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("{}", join_messages(.0))]
    Multiple(Vec<PipelineError>),
}

fn join_messages(errors: &[PipelineError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "Documents could not be generated or delivered. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl PipelineError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }

    /// Whether re-running the whole pipeline could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Field(_) | Self::Configuration(_) => false,
            Self::Render { .. } => true,
            Self::Dispatch(error) => error.is_retryable(),
            Self::Multiple(errors) => errors.iter().all(PipelineError::is_retryable),
        }
    }
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Send { .. } | Self::Timeout { .. })
    }
}

impl From<PipelineError> for InterfaceError {
    fn from(value: PipelineError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            PipelineError::Field(_) => Self::BadRequest { message, correlation_id },
            PipelineError::Configuration(_) => Self::Internal { message, correlation_id },
            PipelineError::Dispatch(DispatchError::MissingRecipient { .. }) => {
                Self::BadRequest { message, correlation_id }
            }
            PipelineError::Render { .. }
            | PipelineError::Dispatch(_)
            | PipelineError::Multiple(_) => Self::ServiceUnavailable { message, correlation_id },
        }
    }
}
