use std::sync::Arc;

use quotedoc_core::config::{AppConfig, ConfigError};
use quotedoc_core::errors::ConfigurationError;
use quotedoc_core::mail::{MailSender, MessageComposer};
use quotedoc_core::render::TemplateStore;
use quotedoc_core::DispatchOrchestrator;
use quotedoc_google::{GoogleApiError, GoogleTemplateStore};
use quotedoc_mail::{SmtpError, SmtpMailSender};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub orchestrator: Arc<DispatchOrchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("template store setup failed: {0}")]
    Store(#[source] GoogleApiError),
    #[error("mail sender setup failed: {0}")]
    Mail(#[source] SmtpError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        store_auth = ?config.store.auth,
        mail_auth = ?config.mail.auth,
        "starting application bootstrap"
    );

    let store = GoogleTemplateStore::from_config(&config.store, &config.oauth)
        .map_err(BootstrapError::Store)?;
    let sender =
        SmtpMailSender::from_config(&config.mail, &config.oauth).map_err(BootstrapError::Mail)?;

    let orchestrator = assemble(&config, Arc::new(store), Arc::new(sender))?;
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        templates = orchestrator.registry().len(),
        render_scheduling = %orchestrator.options().scheduling,
        failure_aggregation = %orchestrator.options().aggregation,
        "dispatch pipeline assembled"
    );

    Ok(Application { config, orchestrator: Arc::new(orchestrator) })
}

/// Wires the orchestrator around whichever store and sender the caller provides.
pub fn assemble(
    config: &AppConfig,
    store: Arc<dyn TemplateStore>,
    sender: Arc<dyn MailSender>,
) -> Result<DispatchOrchestrator, BootstrapError> {
    let registry = config.template_registry()?;
    let composer = MessageComposer::new(config.mail.internal_recipient.clone())?;
    Ok(DispatchOrchestrator::new(
        Arc::new(registry),
        store,
        sender,
        composer,
        config.dispatch.options(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quotedoc_core::config::{AppConfig, StoreAuth};
    use quotedoc_core::testing::{RecordingMailSender, RecordingTemplateStore};
    use quotedoc_core::RenderScheduling;

    use crate::bootstrap::{assemble, bootstrap_with_config, BootstrapError};

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.templates.quote_private = "tpl-qp".to_string();
        config.templates.quote_business = "tpl-qb".to_string();
        config.templates.contract_private_car = "tpl-cpc".to_string();
        config.templates.contract_private_van = "tpl-cpv".to_string();
        config.templates.contract_business_car = "tpl-cbc".to_string();
        config.templates.contract_business_van = "tpl-cbv".to_string();
        config.store.workspace_folder_id = "folder-1".to_string();
        config.mail.sender = "noleggi@x.test".to_string();
        config.mail.internal_recipient = "ops@x.test".to_string();
        config.oauth.client_id = Some("client".to_string());
        config.oauth.client_secret = Some("secret".to_string().into());
        config.oauth.refresh_token = Some("refresh".to_string().into());
        config
    }

    #[test]
    fn assemble_builds_registry_from_templates_and_dispatch_options() {
        let mut config = valid_config();
        config.dispatch.render_scheduling = RenderScheduling::Concurrent;

        let orchestrator = assemble(
            &config,
            Arc::new(RecordingTemplateStore::new()),
            Arc::new(RecordingMailSender::new()),
        )
        .expect("assembles");

        assert!(orchestrator.registry().is_complete());
        assert_eq!(orchestrator.options().scheduling, RenderScheduling::Concurrent);
    }

    #[test]
    fn assemble_rejects_incomplete_template_matrix() {
        let mut config = valid_config();
        config.templates.contract_business_van = String::new();

        let result = assemble(
            &config,
            Arc::new(RecordingTemplateStore::new()),
            Arc::new(RecordingMailSender::new()),
        );

        let message = result.err().expect("error").to_string();
        assert!(message.contains("templates.contract.business.van"), "{message}");
    }

    #[test]
    fn bootstrap_wires_google_store_and_smtp_sender_without_network() {
        let app = bootstrap_with_config(valid_config()).expect("bootstrap succeeds");
        assert_eq!(app.orchestrator.registry().len(), 6);
        assert_eq!(app.config.store.workspace_folder_id, "folder-1");
    }

    #[test]
    fn bootstrap_fails_when_static_store_token_is_missing() {
        let mut config = valid_config();
        config.store.auth = StoreAuth::Static;

        let result = bootstrap_with_config(config);
        assert!(matches!(result, Err(BootstrapError::Store(_))));
    }

    #[test]
    fn bootstrap_fails_when_mail_oauth_credentials_are_missing() {
        let mut config = valid_config();
        config.oauth.refresh_token = None;

        let result = bootstrap_with_config(config);
        assert!(matches!(result, Err(BootstrapError::Mail(_))));
    }
}
