use quotedoc_core::config::{template_env_key, AppConfig, LoadOptions};
use quotedoc_core::TemplateKey;
use serde::Serialize;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct TemplateEntry {
    key: String,
    document_type: &'static str,
    customer_category: &'static str,
    vehicle_variant: Option<&'static str>,
    template_id: String,
    env_key: String,
}

#[derive(Debug, Serialize)]
struct TemplateMatrix {
    command: &'static str,
    status: &'static str,
    templates: Vec<TemplateEntry>,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("templates", "config_validation", error.to_string(), 2)
        }
    };
    let registry = match config.template_registry() {
        Ok(registry) => registry,
        Err(error) => {
            return CommandResult::failure("templates", "template_registry", error.to_string(), 3)
        }
    };

    let templates = registry
        .entries()
        .map(|(key, template_id)| TemplateEntry {
            key: key.config_path(),
            document_type: key.document_type().as_str(),
            customer_category: key.customer_category().as_str(),
            vehicle_variant: match key {
                TemplateKey::Quote(_) => None,
                TemplateKey::Contract(_, variant) => Some(variant.as_str()),
            },
            template_id: template_id.to_string(),
            env_key: template_env_key(key),
        })
        .collect();

    let matrix = TemplateMatrix { command: "templates", status: "ok", templates };
    match serde_json::to_string_pretty(&matrix) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => {
            CommandResult::failure("templates", "serialization", error.to_string(), 1)
        }
    }
}
