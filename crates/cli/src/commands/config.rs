use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use quotedoc_core::config::{
    template_env_key, AppConfig, LoadOptions, DEFAULT_CONFIG_FILE, NESTED_CONFIG_FILE,
};
use quotedoc_core::TemplateKey;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct ConfigLine {
    key_path: String,
    env_keys: Vec<String>,
    value: String,
}

impl ConfigLine {
    fn new(key_path: &str, env_keys: &[&str], value: impl Into<String>) -> Self {
        Self {
            key_path: key_path.to_string(),
            env_keys: env_keys.iter().map(|key| key.to_string()).collect(),
            value: value.into(),
        }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for line in config_lines(&config) {
        let source = field_source(
            &line.key_path,
            &line.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(&line.key_path, &line.value, source));
    }

    lines.join("\n")
}

fn config_lines(config: &AppConfig) -> Vec<ConfigLine> {
    let mut lines = vec![
        ConfigLine::new(
            "server.bind_address",
            &["QUOTEDOC_SERVER_BIND_ADDRESS"],
            &config.server.bind_address,
        ),
        ConfigLine::new(
            "server.port",
            &["QUOTEDOC_SERVER_PORT", "PORT"],
            config.server.port.to_string(),
        ),
        ConfigLine::new(
            "server.graceful_shutdown_secs",
            &["QUOTEDOC_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs.to_string(),
        ),
    ];

    for key in TemplateKey::ALL {
        let env_key = template_env_key(key);
        lines.push(ConfigLine::new(
            &key.config_path(),
            &[env_key.as_str()],
            config.templates.get(key),
        ));
    }

    lines.extend([
        ConfigLine::new(
            "store.workspace_folder_id",
            &["QUOTEDOC_STORE_WORKSPACE_FOLDER_ID"],
            &config.store.workspace_folder_id,
        ),
        ConfigLine::new(
            "store.drive_base_url",
            &["QUOTEDOC_STORE_DRIVE_BASE_URL"],
            &config.store.drive_base_url,
        ),
        ConfigLine::new(
            "store.docs_base_url",
            &["QUOTEDOC_STORE_DOCS_BASE_URL"],
            &config.store.docs_base_url,
        ),
        ConfigLine::new(
            "store.metadata_url",
            &["QUOTEDOC_STORE_METADATA_URL"],
            &config.store.metadata_url,
        ),
        ConfigLine::new(
            "store.timeout_secs",
            &["QUOTEDOC_STORE_TIMEOUT_SECS"],
            config.store.timeout_secs.to_string(),
        ),
        ConfigLine::new("store.auth", &["QUOTEDOC_STORE_AUTH"], format!("{:?}", config.store.auth)),
        ConfigLine::new(
            "store.access_token",
            &["QUOTEDOC_STORE_ACCESS_TOKEN"],
            redact_secret(config.store.access_token.as_ref()),
        ),
        ConfigLine::new(
            "mail.sender",
            &["QUOTEDOC_MAIL_SENDER", "GMAIL_SENDER"],
            &config.mail.sender,
        ),
        ConfigLine::new(
            "mail.internal_recipient",
            &["QUOTEDOC_MAIL_INTERNAL_RECIPIENT", "INTERNAL_EMAIL"],
            &config.mail.internal_recipient,
        ),
        ConfigLine::new("mail.smtp_host", &["QUOTEDOC_MAIL_SMTP_HOST"], &config.mail.smtp_host),
        ConfigLine::new(
            "mail.smtp_port",
            &["QUOTEDOC_MAIL_SMTP_PORT"],
            config.mail.smtp_port.to_string(),
        ),
        ConfigLine::new("mail.auth", &["QUOTEDOC_MAIL_AUTH"], format!("{:?}", config.mail.auth)),
        ConfigLine::new(
            "mail.username",
            &["QUOTEDOC_MAIL_USERNAME"],
            config.mail.username.as_deref().unwrap_or("<unset>"),
        ),
        ConfigLine::new(
            "mail.password",
            &["QUOTEDOC_MAIL_PASSWORD"],
            redact_secret(config.mail.password.as_ref()),
        ),
        ConfigLine::new(
            "mail.timeout_secs",
            &["QUOTEDOC_MAIL_TIMEOUT_SECS"],
            config.mail.timeout_secs.to_string(),
        ),
        ConfigLine::new(
            "oauth.client_id",
            &["QUOTEDOC_OAUTH_CLIENT_ID", "GMAIL_CLIENT_ID"],
            config.oauth.client_id.as_deref().unwrap_or("<unset>"),
        ),
        ConfigLine::new(
            "oauth.client_secret",
            &["QUOTEDOC_OAUTH_CLIENT_SECRET", "GMAIL_CLIENT_SECRET"],
            redact_secret(config.oauth.client_secret.as_ref()),
        ),
        ConfigLine::new(
            "oauth.refresh_token",
            &["QUOTEDOC_OAUTH_REFRESH_TOKEN", "GMAIL_REFRESH_TOKEN"],
            redact_secret(config.oauth.refresh_token.as_ref()),
        ),
        ConfigLine::new("oauth.token_url", &["QUOTEDOC_OAUTH_TOKEN_URL"], &config.oauth.token_url),
        ConfigLine::new(
            "dispatch.render_scheduling",
            &["QUOTEDOC_DISPATCH_RENDER_SCHEDULING"],
            config.dispatch.render_scheduling.to_string(),
        ),
        ConfigLine::new(
            "dispatch.failure_aggregation",
            &["QUOTEDOC_DISPATCH_FAILURE_AGGREGATION"],
            config.dispatch.failure_aggregation.to_string(),
        ),
        ConfigLine::new(
            "dispatch.call_timeout_secs",
            &["QUOTEDOC_DISPATCH_CALL_TIMEOUT_SECS"],
            config.dispatch.call_timeout_secs.to_string(),
        ),
        ConfigLine::new(
            "dispatch.render_retries",
            &["QUOTEDOC_DISPATCH_RENDER_RETRIES"],
            config.dispatch.render_retries.to_string(),
        ),
        ConfigLine::new(
            "dispatch.send_retries",
            &["QUOTEDOC_DISPATCH_SEND_RETRIES"],
            config.dispatch.send_retries.to_string(),
        ),
        ConfigLine::new(
            "dispatch.retry_base_delay_ms",
            &["QUOTEDOC_DISPATCH_RETRY_BASE_DELAY_MS"],
            config.dispatch.retry_base_delay_ms.to_string(),
        ),
        ConfigLine::new(
            "dispatch.retry_max_delay_ms",
            &["QUOTEDOC_DISPATCH_RETRY_MAX_DELAY_MS"],
            config.dispatch.retry_max_delay_ms.to_string(),
        ),
        ConfigLine::new(
            "logging.level",
            &["QUOTEDOC_LOGGING_LEVEL", "QUOTEDOC_LOG_LEVEL"],
            &config.logging.level,
        ),
        ConfigLine::new(
            "logging.format",
            &["QUOTEDOC_LOGGING_FORMAT", "QUOTEDOC_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]);

    lines
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[String],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let env_key = env_keys
        .iter()
        .find(|key| env::var(key.as_str()).is_ok_and(|value| !value.trim().is_empty()));
    if let Some(env_key) = env_key {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    match secret {
        None => "<unset>",
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>",
        Some(_) => "<redacted>",
    }
}
