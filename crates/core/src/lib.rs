pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod mail;
pub mod registry;
pub mod render;
pub mod retry;
pub mod testing;

pub use dispatch::{
    DispatchOptions, DispatchOrchestrator, DispatchOutcome, DispatchReport, FailureAggregation,
    RenderScheduling,
};
pub use domain::document::{
    CustomerCategory, DocumentType, TemplateId, TemplateKey, VehicleVariant,
};
pub use domain::fields::{Field, FieldRecord};
pub use errors::{
    CleanupWarning, ConfigurationError, DispatchError, FieldError, InterfaceError, MailError,
    PipelineError, RenderError, StoreError,
};
pub use mail::{Attachment, Audience, MailSender, MessageComposer, OutboundMessage};
pub use registry::TemplateRegistry;
pub use render::{DocumentRenderer, RenderedDocument, Replacement, TemplateStore, WorkingCopyId};
pub use retry::RetryPolicy;
