use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::{DispatchOptions, FailureAggregation, RenderScheduling};
use crate::domain::document::{CustomerCategory, TemplateKey, VehicleVariant};
use crate::registry::TemplateRegistry;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "quotedoc.toml";
pub const NESTED_CONFIG_FILE: &str = "config/quotedoc.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub templates: TemplatesConfig,
    pub store: StoreConfig,
    pub mail: MailConfig,
    pub oauth: OAuthConfig,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Remote template identifiers, one per supported `TemplateKey`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplatesConfig {
    pub quote_private: String,
    pub quote_business: String,
    pub contract_private_car: String,
    pub contract_private_van: String,
    pub contract_business_car: String,
    pub contract_business_van: String,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Shared-drive folder that receives working copies.
    pub workspace_folder_id: String,
    pub drive_base_url: String,
    pub docs_base_url: String,
    pub metadata_url: String,
    pub timeout_secs: u64,
    pub auth: StoreAuth,
    pub access_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub sender: String,
    pub internal_recipient: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub auth: MailAuth,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct OAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub token_url: String,
}

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub render_scheduling: RenderScheduling,
    pub failure_aggregation: FailureAggregation,
    pub call_timeout_secs: u64,
    pub render_retries: u32,
    pub send_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreAuth {
    /// Access tokens from the runtime's metadata server.
    Metadata,
    /// A fixed access token from configuration.
    Static,
    /// OAuth2 refresh-token grant using the `[oauth]` section.
    RefreshToken,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MailAuth {
    /// XOAUTH2 with an access token from the `[oauth]` section.
    #[serde(rename = "oauth2")]
    OAuth2,
    #[serde(rename = "password")]
    Password,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub internal_recipient: Option<String>,
    pub render_scheduling: Option<RenderScheduling>,
    pub failure_aggregation: Option<FailureAggregation>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            templates: TemplatesConfig::default(),
            store: StoreConfig {
                workspace_folder_id: String::new(),
                drive_base_url: "https://www.googleapis.com/drive/v3".to_string(),
                docs_base_url: "https://docs.googleapis.com/v1".to_string(),
                metadata_url: "http://metadata.google.internal/computeMetadata/v1".to_string(),
                timeout_secs: 30,
                auth: StoreAuth::Metadata,
                access_token: None,
            },
            mail: MailConfig {
                sender: String::new(),
                internal_recipient: String::new(),
                smtp_host: "smtp.gmail.com".to_string(),
                smtp_port: 587,
                auth: MailAuth::OAuth2,
                username: None,
                password: None,
                timeout_secs: 30,
            },
            oauth: OAuthConfig {
                client_id: None,
                client_secret: None,
                refresh_token: None,
                token_url: "https://oauth2.googleapis.com/token".to_string(),
            },
            dispatch: DispatchConfig {
                render_scheduling: RenderScheduling::Sequential,
                failure_aggregation: FailureAggregation::FailFast,
                call_timeout_secs: 30,
                render_retries: 0,
                send_retries: 0,
                retry_base_delay_ms: 250,
                retry_max_delay_ms: 5_000,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl TemplatesConfig {
    pub fn get(&self, key: TemplateKey) -> &str {
        self.slot(key).as_str()
    }

    pub fn set(&mut self, key: TemplateKey, value: impl Into<String>) {
        *self.slot_mut(key) = value.into();
    }

    fn slot(&self, key: TemplateKey) -> &String {
        use CustomerCategory::{Business, Private};
        use VehicleVariant::{Car, Van};

        match key {
            TemplateKey::Quote(Private) => &self.quote_private,
            TemplateKey::Quote(Business) => &self.quote_business,
            TemplateKey::Contract(Private, Car) => &self.contract_private_car,
            TemplateKey::Contract(Private, Van) => &self.contract_private_van,
            TemplateKey::Contract(Business, Car) => &self.contract_business_car,
            TemplateKey::Contract(Business, Van) => &self.contract_business_van,
        }
    }

    fn slot_mut(&mut self, key: TemplateKey) -> &mut String {
        use CustomerCategory::{Business, Private};
        use VehicleVariant::{Car, Van};

        match key {
            TemplateKey::Quote(Private) => &mut self.quote_private,
            TemplateKey::Quote(Business) => &mut self.quote_business,
            TemplateKey::Contract(Private, Car) => &mut self.contract_private_car,
            TemplateKey::Contract(Private, Van) => &mut self.contract_private_van,
            TemplateKey::Contract(Business, Car) => &mut self.contract_business_car,
            TemplateKey::Contract(Business, Van) => &mut self.contract_business_van,
        }
    }
}

/// Environment variable carrying the identifier for `key`, e.g.
/// `QUOTEDOC_TEMPLATES_CONTRACT_PRIVATE_VAN`.
pub fn template_env_key(key: TemplateKey) -> String {
    format!("QUOTEDOC_{}", key.config_path().replace('.', "_").to_ascii_uppercase())
}

impl std::str::FromStr for StoreAuth {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "metadata" => Ok(Self::Metadata),
            "static" => Ok(Self::Static),
            "refresh_token" => Ok(Self::RefreshToken),
            other => Err(ConfigError::Validation(format!(
                "unsupported store auth `{other}` (expected metadata|static|refresh_token)"
            ))),
        }
    }
}

impl std::str::FromStr for MailAuth {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "oauth2" | "xoauth2" => Ok(Self::OAuth2),
            "password" => Ok(Self::Password),
            other => Err(ConfigError::Validation(format!(
                "unsupported mail auth `{other}` (expected oauth2|password)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl DispatchConfig {
    pub fn options(&self) -> DispatchOptions {
        DispatchOptions {
            scheduling: self.render_scheduling,
            aggregation: self.failure_aggregation,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            render_retry: RetryPolicy::with_retries(
                self.render_retries,
                self.retry_base_delay_ms,
                self.retry_max_delay_ms,
            ),
            send_retry: RetryPolicy::with_retries(
                self.send_retries,
                self.retry_base_delay_ms,
                self.retry_max_delay_ms,
            ),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// The validated registry the dispatch pipeline runs with.
    pub fn template_registry(&self) -> Result<TemplateRegistry, ConfigError> {
        TemplateRegistry::from_config(&self.templates)
            .map_err(|error| ConfigError::Validation(error.to_string()))
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(templates) = patch.templates {
            if let Some(quote) = templates.quote {
                if let Some(id) = quote.private {
                    self.templates.quote_private = id;
                }
                if let Some(id) = quote.business {
                    self.templates.quote_business = id;
                }
            }
            if let Some(contract) = templates.contract {
                if let Some(private) = contract.private {
                    if let Some(id) = private.car {
                        self.templates.contract_private_car = id;
                    }
                    if let Some(id) = private.van {
                        self.templates.contract_private_van = id;
                    }
                }
                if let Some(business) = contract.business {
                    if let Some(id) = business.car {
                        self.templates.contract_business_car = id;
                    }
                    if let Some(id) = business.van {
                        self.templates.contract_business_van = id;
                    }
                }
            }
        }

        if let Some(store) = patch.store {
            if let Some(workspace_folder_id) = store.workspace_folder_id {
                self.store.workspace_folder_id = workspace_folder_id;
            }
            if let Some(drive_base_url) = store.drive_base_url {
                self.store.drive_base_url = drive_base_url;
            }
            if let Some(docs_base_url) = store.docs_base_url {
                self.store.docs_base_url = docs_base_url;
            }
            if let Some(metadata_url) = store.metadata_url {
                self.store.metadata_url = metadata_url;
            }
            if let Some(timeout_secs) = store.timeout_secs {
                self.store.timeout_secs = timeout_secs;
            }
            if let Some(auth) = store.auth {
                self.store.auth = auth;
            }
            if let Some(store_access_token_value) = store.access_token {
                self.store.access_token = Some(secret_value(store_access_token_value));
            }
        }

        if let Some(mail) = patch.mail {
            if let Some(sender) = mail.sender {
                self.mail.sender = sender;
            }
            if let Some(internal_recipient) = mail.internal_recipient {
                self.mail.internal_recipient = internal_recipient;
            }
            if let Some(smtp_host) = mail.smtp_host {
                self.mail.smtp_host = smtp_host;
            }
            if let Some(smtp_port) = mail.smtp_port {
                self.mail.smtp_port = smtp_port;
            }
            if let Some(auth) = mail.auth {
                self.mail.auth = auth;
            }
            if let Some(username) = mail.username {
                self.mail.username = Some(username);
            }
            if let Some(mail_password_value) = mail.password {
                self.mail.password = Some(secret_value(mail_password_value));
            }
            if let Some(timeout_secs) = mail.timeout_secs {
                self.mail.timeout_secs = timeout_secs;
            }
        }

        if let Some(oauth) = patch.oauth {
            if let Some(client_id) = oauth.client_id {
                self.oauth.client_id = Some(client_id);
            }
            if let Some(oauth_client_secret_value) = oauth.client_secret {
                self.oauth.client_secret = Some(secret_value(oauth_client_secret_value));
            }
            if let Some(oauth_refresh_token_value) = oauth.refresh_token {
                self.oauth.refresh_token = Some(secret_value(oauth_refresh_token_value));
            }
            if let Some(token_url) = oauth.token_url {
                self.oauth.token_url = token_url;
            }
        }

        if let Some(dispatch) = patch.dispatch {
            if let Some(render_scheduling) = dispatch.render_scheduling {
                self.dispatch.render_scheduling = render_scheduling;
            }
            if let Some(failure_aggregation) = dispatch.failure_aggregation {
                self.dispatch.failure_aggregation = failure_aggregation;
            }
            if let Some(call_timeout_secs) = dispatch.call_timeout_secs {
                self.dispatch.call_timeout_secs = call_timeout_secs;
            }
            if let Some(render_retries) = dispatch.render_retries {
                self.dispatch.render_retries = render_retries;
            }
            if let Some(send_retries) = dispatch.send_retries {
                self.dispatch.send_retries = send_retries;
            }
            if let Some(retry_base_delay_ms) = dispatch.retry_base_delay_ms {
                self.dispatch.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(retry_max_delay_ms) = dispatch.retry_max_delay_ms {
                self.dispatch.retry_max_delay_ms = retry_max_delay_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("QUOTEDOC_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("QUOTEDOC_SERVER_PORT") {
            self.server.port = parse_u16("QUOTEDOC_SERVER_PORT", &value)?;
        } else if let Some(value) = read_env("PORT") {
            self.server.port = parse_u16("PORT", &value)?;
        }
        if let Some(value) = read_env("QUOTEDOC_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("QUOTEDOC_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        for key in TemplateKey::ALL {
            if let Some(value) = read_env(&template_env_key(key)) {
                self.templates.set(key, value);
            }
        }

        if let Some(value) = read_env("QUOTEDOC_STORE_WORKSPACE_FOLDER_ID") {
            self.store.workspace_folder_id = value;
        }
        if let Some(value) = read_env("QUOTEDOC_STORE_DRIVE_BASE_URL") {
            self.store.drive_base_url = value;
        }
        if let Some(value) = read_env("QUOTEDOC_STORE_DOCS_BASE_URL") {
            self.store.docs_base_url = value;
        }
        if let Some(value) = read_env("QUOTEDOC_STORE_METADATA_URL") {
            self.store.metadata_url = value;
        }
        if let Some(value) = read_env("QUOTEDOC_STORE_TIMEOUT_SECS") {
            self.store.timeout_secs = parse_u64("QUOTEDOC_STORE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("QUOTEDOC_STORE_AUTH") {
            self.store.auth = value.parse()?;
        }
        if let Some(value) = read_env("QUOTEDOC_STORE_ACCESS_TOKEN") {
            self.store.access_token = Some(secret_value(value));
        }

        let sender = read_env("QUOTEDOC_MAIL_SENDER").or_else(|| read_env("GMAIL_SENDER"));
        if let Some(value) = sender {
            self.mail.sender = value;
        }
        let internal_recipient =
            read_env("QUOTEDOC_MAIL_INTERNAL_RECIPIENT").or_else(|| read_env("INTERNAL_EMAIL"));
        if let Some(value) = internal_recipient {
            self.mail.internal_recipient = value;
        }
        if let Some(value) = read_env("QUOTEDOC_MAIL_SMTP_HOST") {
            self.mail.smtp_host = value;
        }
        if let Some(value) = read_env("QUOTEDOC_MAIL_SMTP_PORT") {
            self.mail.smtp_port = parse_u16("QUOTEDOC_MAIL_SMTP_PORT", &value)?;
        }
        if let Some(value) = read_env("QUOTEDOC_MAIL_AUTH") {
            self.mail.auth = value.parse()?;
        }
        if let Some(value) = read_env("QUOTEDOC_MAIL_USERNAME") {
            self.mail.username = Some(value);
        }
        if let Some(value) = read_env("QUOTEDOC_MAIL_PASSWORD") {
            self.mail.password = Some(secret_value(value));
        }
        if let Some(value) = read_env("QUOTEDOC_MAIL_TIMEOUT_SECS") {
            self.mail.timeout_secs = parse_u64("QUOTEDOC_MAIL_TIMEOUT_SECS", &value)?;
        }

        let client_id =
            read_env("QUOTEDOC_OAUTH_CLIENT_ID").or_else(|| read_env("GMAIL_CLIENT_ID"));
        if let Some(value) = client_id {
            self.oauth.client_id = Some(value);
        }
        let client_secret =
            read_env("QUOTEDOC_OAUTH_CLIENT_SECRET").or_else(|| read_env("GMAIL_CLIENT_SECRET"));
        if let Some(value) = client_secret {
            self.oauth.client_secret = Some(secret_value(value));
        }
        let refresh_token =
            read_env("QUOTEDOC_OAUTH_REFRESH_TOKEN").or_else(|| read_env("GMAIL_REFRESH_TOKEN"));
        if let Some(value) = refresh_token {
            self.oauth.refresh_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("QUOTEDOC_OAUTH_TOKEN_URL") {
            self.oauth.token_url = value;
        }

        if let Some(value) = read_env("QUOTEDOC_DISPATCH_RENDER_SCHEDULING") {
            self.dispatch.render_scheduling = value.parse()?;
        }
        if let Some(value) = read_env("QUOTEDOC_DISPATCH_FAILURE_AGGREGATION") {
            self.dispatch.failure_aggregation = value.parse()?;
        }
        if let Some(value) = read_env("QUOTEDOC_DISPATCH_CALL_TIMEOUT_SECS") {
            self.dispatch.call_timeout_secs =
                parse_u64("QUOTEDOC_DISPATCH_CALL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("QUOTEDOC_DISPATCH_RENDER_RETRIES") {
            self.dispatch.render_retries = parse_u32("QUOTEDOC_DISPATCH_RENDER_RETRIES", &value)?;
        }
        if let Some(value) = read_env("QUOTEDOC_DISPATCH_SEND_RETRIES") {
            self.dispatch.send_retries = parse_u32("QUOTEDOC_DISPATCH_SEND_RETRIES", &value)?;
        }
        if let Some(value) = read_env("QUOTEDOC_DISPATCH_RETRY_BASE_DELAY_MS") {
            self.dispatch.retry_base_delay_ms =
                parse_u64("QUOTEDOC_DISPATCH_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("QUOTEDOC_DISPATCH_RETRY_MAX_DELAY_MS") {
            self.dispatch.retry_max_delay_ms =
                parse_u64("QUOTEDOC_DISPATCH_RETRY_MAX_DELAY_MS", &value)?;
        }

        let log_level =
            read_env("QUOTEDOC_LOGGING_LEVEL").or_else(|| read_env("QUOTEDOC_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("QUOTEDOC_LOGGING_FORMAT").or_else(|| read_env("QUOTEDOC_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(internal_recipient) = overrides.internal_recipient {
            self.mail.internal_recipient = internal_recipient;
        }
        if let Some(render_scheduling) = overrides.render_scheduling {
            self.dispatch.render_scheduling = render_scheduling;
        }
        if let Some(failure_aggregation) = overrides.failure_aggregation {
            self.dispatch.failure_aggregation = failure_aggregation;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        self.template_registry()?;
        validate_store(&self.store, &self.oauth)?;
        validate_mail(&self.mail, &self.oauth)?;
        validate_dispatch(&self.dispatch)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_store(store: &StoreConfig, oauth: &OAuthConfig) -> Result<(), ConfigError> {
    if store.workspace_folder_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "store.workspace_folder_id is required (the shared-drive folder that receives working copies)"
                .to_string(),
        ));
    }

    for (key, url) in [
        ("store.drive_base_url", &store.drive_base_url),
        ("store.docs_base_url", &store.docs_base_url),
        ("store.metadata_url", &store.metadata_url),
    ] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }

    if store.timeout_secs == 0 || store.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "store.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match store.auth {
        StoreAuth::Metadata => Ok(()),
        StoreAuth::Static => {
            if is_blank_secret(store.access_token.as_ref()) {
                return Err(ConfigError::Validation(
                    "store.access_token is required when store.auth = \"static\"".to_string(),
                ));
            }
            Ok(())
        }
        StoreAuth::RefreshToken => validate_oauth(oauth, "store.auth = \"refresh_token\""),
    }
}

fn validate_mail(mail: &MailConfig, oauth: &OAuthConfig) -> Result<(), ConfigError> {
    if !looks_like_address(&mail.sender) {
        return Err(ConfigError::Validation(
            "mail.sender must be an email address (env: QUOTEDOC_MAIL_SENDER or GMAIL_SENDER)"
                .to_string(),
        ));
    }

    if !looks_like_address(&mail.internal_recipient) {
        return Err(ConfigError::Validation(
            "mail.internal_recipient must be an email address (env: QUOTEDOC_MAIL_INTERNAL_RECIPIENT or INTERNAL_EMAIL)"
                .to_string(),
        ));
    }

    if mail.smtp_host.trim().is_empty() || mail.smtp_port == 0 {
        return Err(ConfigError::Validation(
            "mail.smtp_host and mail.smtp_port must be set".to_string(),
        ));
    }

    if mail.timeout_secs == 0 || mail.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "mail.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match mail.auth {
        MailAuth::OAuth2 => validate_oauth(oauth, "mail.auth = \"oauth2\""),
        MailAuth::Password => {
            if is_blank_secret(mail.password.as_ref()) {
                return Err(ConfigError::Validation(
                    "mail.password is required when mail.auth = \"password\"".to_string(),
                ));
            }
            Ok(())
        }
    }
}

fn validate_oauth(oauth: &OAuthConfig, required_by: &str) -> Result<(), ConfigError> {
    let missing_client_id =
        oauth.client_id.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
    if missing_client_id {
        return Err(ConfigError::Validation(format!(
            "oauth.client_id is required when {required_by}"
        )));
    }
    if is_blank_secret(oauth.client_secret.as_ref()) {
        return Err(ConfigError::Validation(format!(
            "oauth.client_secret is required when {required_by}"
        )));
    }
    if is_blank_secret(oauth.refresh_token.as_ref()) {
        return Err(ConfigError::Validation(format!(
            "oauth.refresh_token is required when {required_by}"
        )));
    }
    if !oauth.token_url.starts_with("https://") && !oauth.token_url.starts_with("http://") {
        return Err(ConfigError::Validation(
            "oauth.token_url must start with http:// or https://".to_string(),
        ));
    }
    Ok(())
}

fn validate_dispatch(dispatch: &DispatchConfig) -> Result<(), ConfigError> {
    if dispatch.call_timeout_secs == 0 || dispatch.call_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "dispatch.call_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if dispatch.render_retries > 5 || dispatch.send_retries > 5 {
        return Err(ConfigError::Validation(
            "dispatch.render_retries and dispatch.send_retries must be at most 5".to_string(),
        ));
    }

    if dispatch.retry_base_delay_ms > dispatch.retry_max_delay_ms {
        return Err(ConfigError::Validation(
            "dispatch.retry_base_delay_ms must not exceed dispatch.retry_max_delay_ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_blank_secret(value: Option<&SecretString>) -> bool {
    value.map(|secret| secret.expose_secret().trim().is_empty()).unwrap_or(true)
}

fn looks_like_address(value: &str) -> bool {
    let trimmed = value.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    templates: Option<TemplatesPatch>,
    store: Option<StorePatch>,
    mail: Option<MailPatch>,
    oauth: Option<OAuthPatch>,
    dispatch: Option<DispatchPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TemplatesPatch {
    quote: Option<QuoteTemplatesPatch>,
    contract: Option<ContractTemplatesPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteTemplatesPatch {
    private: Option<String>,
    business: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ContractTemplatesPatch {
    private: Option<VehicleTemplatesPatch>,
    business: Option<VehicleTemplatesPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct VehicleTemplatesPatch {
    car: Option<String>,
    van: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StorePatch {
    workspace_folder_id: Option<String>,
    drive_base_url: Option<String>,
    docs_base_url: Option<String>,
    metadata_url: Option<String>,
    timeout_secs: Option<u64>,
    auth: Option<StoreAuth>,
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MailPatch {
    sender: Option<String>,
    internal_recipient: Option<String>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    auth: Option<MailAuth>,
    username: Option<String>,
    password: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OAuthPatch {
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    token_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatchPatch {
    render_scheduling: Option<RenderScheduling>,
    failure_aggregation: Option<FailureAggregation>,
    call_timeout_secs: Option<u64>,
    render_retries: Option<u32>,
    send_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
