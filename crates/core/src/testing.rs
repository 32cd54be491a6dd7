//! In-memory doubles for the template store and mail sender.
//!
//! Used by the unit tests in this crate and by the server and CLI test suites.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::document::TemplateId;
use crate::errors::{MailError, StoreError};
use crate::mail::{MailSender, OutboundMessage};
use crate::render::{Replacement, TemplateStore, WorkingCopyId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Copy,
    BatchReplace,
    Export,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    Copy { template_id: TemplateId, name: String },
    BatchReplace { copy: WorkingCopyId, replacements: Vec<Replacement> },
    Export { copy: WorkingCopyId },
    Delete { copy: WorkingCopyId },
}

impl StoreCall {
    pub fn operation(&self) -> StoreOperation {
        match self {
            Self::Copy { .. } => StoreOperation::Copy,
            Self::BatchReplace { .. } => StoreOperation::BatchReplace,
            Self::Export { .. } => StoreOperation::Export,
            Self::Delete { .. } => StoreOperation::Delete,
        }
    }
}

#[derive(Default)]
struct StoreState {
    templates: HashMap<String, String>,
    live: HashMap<WorkingCopyId, String>,
    created: Vec<WorkingCopyId>,
    calls: Vec<StoreCall>,
    failing: HashSet<StoreOperation>,
    failing_templates: HashSet<String>,
    hanging: HashSet<StoreOperation>,
}

/// Template store over plain-text "documents". Exporting returns the working copy's
/// text as bytes, so tests can assert on substitution results directly.
#[derive(Default)]
pub struct RecordingTemplateStore {
    state: Mutex<StoreState>,
}

impl RecordingTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, template_id: &str, body: &str) -> Self {
        self.state_mut().templates.insert(template_id.to_string(), body.to_string());
        self
    }

    /// Every call of `operation` fails with a remote error.
    pub fn fail(mut self, operation: StoreOperation) -> Self {
        self.state_mut().failing.insert(operation);
        self
    }

    /// Every export of a working copy made from `template_id` fails.
    pub fn fail_export_of(mut self, template_id: &str) -> Self {
        self.state_mut().failing_templates.insert(template_id.to_string());
        self
    }

    /// Every call of `operation` is recorded and then never completes.
    pub fn hang(mut self, operation: StoreOperation) -> Self {
        self.state_mut().hanging.insert(operation);
        self
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn created_copies(&self) -> Vec<WorkingCopyId> {
        self.lock().created.clone()
    }

    /// Working copies created and not yet deleted, in creation order.
    pub fn live_copies(&self) -> Vec<WorkingCopyId> {
        let state = self.lock();
        state.created.iter().filter(|id| state.live.contains_key(*id)).cloned().collect()
    }

    fn state_mut(&mut self) -> &mut StoreState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call and reports whether it should hang or fail.
    fn record(&self, call: StoreCall) -> (bool, bool) {
        let operation = call.operation();
        let mut state = self.lock();
        state.calls.push(call);
        (state.hanging.contains(&operation), state.failing.contains(&operation))
    }

    async fn gate(&self, call: StoreCall) -> Result<(), StoreError> {
        let operation = call.operation();
        let (hang, fail) = self.record(call);
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(StoreError::Remote {
                status: 500,
                message: format!("{operation:?} rejected"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TemplateStore for RecordingTemplateStore {
    async fn copy(
        &self,
        template_id: &TemplateId,
        name: &str,
    ) -> Result<WorkingCopyId, StoreError> {
        self.gate(StoreCall::Copy { template_id: template_id.clone(), name: name.to_string() })
            .await?;

        let mut state = self.lock();
        let body = state
            .templates
            .get(template_id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(template_id.to_string()))?;
        let id = WorkingCopyId(format!("copy-{}-{}", state.created.len() + 1, template_id));
        state.created.push(id.clone());
        state.live.insert(id.clone(), body);
        Ok(id)
    }

    async fn batch_replace_text(
        &self,
        copy: &WorkingCopyId,
        replacements: &[Replacement],
    ) -> Result<(), StoreError> {
        self.gate(StoreCall::BatchReplace {
            copy: copy.clone(),
            replacements: replacements.to_vec(),
        })
        .await?;

        let mut state = self.lock();
        let body = state.live.get_mut(copy).ok_or_else(|| StoreError::NotFound(copy.to_string()))?;
        for replacement in replacements {
            *body = body.replace(&replacement.token, &replacement.text);
        }
        Ok(())
    }

    async fn export_pdf(&self, copy: &WorkingCopyId) -> Result<Vec<u8>, StoreError> {
        self.gate(StoreCall::Export { copy: copy.clone() }).await?;

        let state = self.lock();
        if state.failing_templates.iter().any(|template| copy.as_str().ends_with(template.as_str()))
        {
            return Err(StoreError::Remote {
                status: 500,
                message: format!("export of {copy} rejected"),
            });
        }
        state
            .live
            .get(copy)
            .map(|body| body.as_bytes().to_vec())
            .ok_or_else(|| StoreError::NotFound(copy.to_string()))
    }

    async fn delete(&self, copy: &WorkingCopyId) -> Result<(), StoreError> {
        self.gate(StoreCall::Delete { copy: copy.clone() }).await?;

        self.lock().live.remove(copy);
        Ok(())
    }
}

#[derive(Default)]
struct MailState {
    sent: Vec<OutboundMessage>,
    attempts: usize,
    failing_recipients: HashSet<String>,
    fail_always: bool,
    hang: bool,
}

/// Mail sender that records every delivered message.
#[derive(Default)]
pub struct RecordingMailSender {
    state: Mutex<MailState>,
}

impl RecordingMailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for_recipient(mut self, recipient: &str) -> Self {
        self.state_mut().failing_recipients.insert(recipient.to_string());
        self
    }

    pub fn fail_always(mut self) -> Self {
        self.state_mut().fail_always = true;
        self
    }

    pub fn hang(mut self) -> Self {
        self.state_mut().hang = true;
        self
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.lock().sent.clone()
    }

    /// Delivery attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    fn state_mut(&mut self) -> &mut MailState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, MailState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MailSender for RecordingMailSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), MailError> {
        let hang = {
            let mut state = self.lock();
            state.attempts += 1;
            state.hang
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.lock();
        if state.fail_always || state.failing_recipients.contains(&message.to) {
            return Err(MailError::Transport(format!("550 mailbox {} unavailable", message.to)));
        }
        state.sent.push(message.clone());
        Ok(())
    }
}
