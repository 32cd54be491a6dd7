use std::env;
use std::sync::{Mutex, OnceLock};

use quotedoc_cli::commands::{config, doctor, templates};
use serde_json::Value;

const VALID_ENV: [(&str, &str); 12] = [
    ("QUOTEDOC_TEMPLATES_QUOTE_PRIVATE", "tpl-qp"),
    ("QUOTEDOC_TEMPLATES_QUOTE_BUSINESS", "tpl-qb"),
    ("QUOTEDOC_TEMPLATES_CONTRACT_PRIVATE_CAR", "tpl-cpc"),
    ("QUOTEDOC_TEMPLATES_CONTRACT_PRIVATE_VAN", "tpl-cpv"),
    ("QUOTEDOC_TEMPLATES_CONTRACT_BUSINESS_CAR", "tpl-cbc"),
    ("QUOTEDOC_TEMPLATES_CONTRACT_BUSINESS_VAN", "tpl-cbv"),
    ("QUOTEDOC_STORE_WORKSPACE_FOLDER_ID", "folder-1"),
    ("QUOTEDOC_MAIL_SENDER", "noleggi@x.test"),
    ("QUOTEDOC_MAIL_INTERNAL_RECIPIENT", "ops@x.test"),
    ("QUOTEDOC_OAUTH_CLIENT_ID", "client-id"),
    ("QUOTEDOC_OAUTH_CLIENT_SECRET", "client-secret-value"),
    ("QUOTEDOC_OAUTH_REFRESH_TOKEN", "refresh-token-value"),
];

#[test]
fn templates_returns_resolved_matrix_with_valid_env() {
    with_env(&VALID_ENV, || {
        let result = templates::run();
        assert_eq!(result.exit_code, 0, "expected template matrix output");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "templates");
        assert_eq!(payload["status"], "ok");

        let entries = payload["templates"].as_array().expect("templates array");
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[0]["key"], "templates.quote.private");
        assert_eq!(entries[0]["template_id"], "tpl-qp");
        assert_eq!(entries[0]["vehicle_variant"], Value::Null);
        assert_eq!(entries[5]["key"], "templates.contract.business.van");
        assert_eq!(entries[5]["document_type"], "contract");
        assert_eq!(entries[5]["customer_category"], "business");
        assert_eq!(entries[5]["vehicle_variant"], "van");
        assert_eq!(entries[5]["env_key"], "QUOTEDOC_TEMPLATES_CONTRACT_BUSINESS_VAN");
    });
}

#[test]
fn templates_returns_config_failure_without_env() {
    with_env(&[], || {
        let result = templates::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "templates");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_json_passes_with_valid_env() {
    with_env(&VALID_ENV, || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "expected passing doctor report");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");

        let checks = payload["checks"].as_array().expect("checks array");
        let names: Vec<&str> = checks.iter().filter_map(|check| check["name"].as_str()).collect();
        assert_eq!(
            names,
            vec![
                "config_validation",
                "template_registry",
                "mail_templates",
                "store_credentials",
                "mail_credentials"
            ]
        );
        assert!(checks.iter().all(|check| check["status"] == "pass"));
        assert_eq!(checks[1]["details"], "6 distinct templates registered");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1, "expected failing doctor report");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");

        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

#[test]
fn doctor_human_output_lists_each_check() {
    with_env(&VALID_ENV, || {
        let result = doctor::run(false);

        assert!(result.output.starts_with("doctor: all readiness checks passed"));
        assert!(result.output.contains("- [ok] template_registry: 6 distinct templates registered"));
        assert!(result.output.contains("- [ok] mail_credentials: XOAUTH2 with refresh token"));
    });
}

#[test]
fn config_attributes_sources_and_redacts_secrets() {
    with_env(&VALID_ENV, || {
        let output = config::run();

        assert!(output.starts_with("effective config"));
        assert!(output
            .contains("- mail.sender = noleggi@x.test (source: env (QUOTEDOC_MAIL_SENDER))"));
        assert!(output.contains("- server.port = 8080 (source: default)"));
        assert!(output.contains(
            "- templates.contract.private.van = tpl-cpv \
             (source: env (QUOTEDOC_TEMPLATES_CONTRACT_PRIVATE_VAN))"
        ));
        assert!(output.contains(
            "- oauth.refresh_token = <redacted> (source: env (QUOTEDOC_OAUTH_REFRESH_TOKEN))"
        ));
        assert!(output.contains("- store.access_token = <unset> (source: default)"));
        assert!(!output.contains("refresh-token-value"));
        assert!(!output.contains("client-secret-value"));
    });
}

#[test]
fn config_attributes_legacy_variable_names() {
    let mut vars: Vec<(&str, &str)> =
        VALID_ENV.iter().copied().filter(|(key, _)| *key != "QUOTEDOC_MAIL_SENDER").collect();
    vars.push(("GMAIL_SENDER", "legacy@x.test"));
    vars.push(("PORT", "9090"));

    with_env(&vars, || {
        let output = config::run();

        assert!(output.contains("- mail.sender = legacy@x.test (source: env (GMAIL_SENDER))"));
        assert!(output.contains("- server.port = 9090 (source: env (PORT))"));
    });
}

#[test]
fn config_reports_validation_failure_without_env() {
    with_env(&[], || {
        let output = config::run();
        assert!(output.starts_with("config validation failed"), "{output}");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "QUOTEDOC_SERVER_BIND_ADDRESS",
        "QUOTEDOC_SERVER_PORT",
        "QUOTEDOC_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "PORT",
        "QUOTEDOC_TEMPLATES_QUOTE_PRIVATE",
        "QUOTEDOC_TEMPLATES_QUOTE_BUSINESS",
        "QUOTEDOC_TEMPLATES_CONTRACT_PRIVATE_CAR",
        "QUOTEDOC_TEMPLATES_CONTRACT_PRIVATE_VAN",
        "QUOTEDOC_TEMPLATES_CONTRACT_BUSINESS_CAR",
        "QUOTEDOC_TEMPLATES_CONTRACT_BUSINESS_VAN",
        "QUOTEDOC_STORE_WORKSPACE_FOLDER_ID",
        "QUOTEDOC_STORE_DRIVE_BASE_URL",
        "QUOTEDOC_STORE_DOCS_BASE_URL",
        "QUOTEDOC_STORE_METADATA_URL",
        "QUOTEDOC_STORE_TIMEOUT_SECS",
        "QUOTEDOC_STORE_AUTH",
        "QUOTEDOC_STORE_ACCESS_TOKEN",
        "QUOTEDOC_MAIL_SENDER",
        "GMAIL_SENDER",
        "QUOTEDOC_MAIL_INTERNAL_RECIPIENT",
        "INTERNAL_EMAIL",
        "QUOTEDOC_MAIL_SMTP_HOST",
        "QUOTEDOC_MAIL_SMTP_PORT",
        "QUOTEDOC_MAIL_AUTH",
        "QUOTEDOC_MAIL_USERNAME",
        "QUOTEDOC_MAIL_PASSWORD",
        "QUOTEDOC_MAIL_TIMEOUT_SECS",
        "QUOTEDOC_OAUTH_CLIENT_ID",
        "GMAIL_CLIENT_ID",
        "QUOTEDOC_OAUTH_CLIENT_SECRET",
        "GMAIL_CLIENT_SECRET",
        "QUOTEDOC_OAUTH_REFRESH_TOKEN",
        "GMAIL_REFRESH_TOKEN",
        "QUOTEDOC_OAUTH_TOKEN_URL",
        "QUOTEDOC_DISPATCH_RENDER_SCHEDULING",
        "QUOTEDOC_DISPATCH_FAILURE_AGGREGATION",
        "QUOTEDOC_DISPATCH_CALL_TIMEOUT_SECS",
        "QUOTEDOC_DISPATCH_RENDER_RETRIES",
        "QUOTEDOC_DISPATCH_SEND_RETRIES",
        "QUOTEDOC_DISPATCH_RETRY_BASE_DELAY_MS",
        "QUOTEDOC_DISPATCH_RETRY_MAX_DELAY_MS",
        "QUOTEDOC_LOGGING_LEVEL",
        "QUOTEDOC_LOGGING_FORMAT",
        "QUOTEDOC_LOG_LEVEL",
        "QUOTEDOC_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
