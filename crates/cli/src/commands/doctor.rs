use quotedoc_core::config::{AppConfig, LoadOptions, MailAuth, StoreAuth};
use quotedoc_core::MessageComposer;
use quotedoc_google::GoogleTemplateStore;
use quotedoc_mail::SmtpMailSender;
use serde::Serialize;

use super::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["template_registry", "mail_templates", "store_credentials", "mail_credentials"];

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_template_registry(&config));
            checks.push(check_mail_templates(&config));
            checks.push(check_store_credentials(&config));
            checks.push(check_mail_credentials(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_template_registry(config: &AppConfig) -> DoctorCheck {
    match config.template_registry() {
        Ok(registry) if registry.is_complete() => DoctorCheck {
            name: "template_registry",
            status: CheckStatus::Pass,
            details: format!("{} distinct templates registered", registry.len()),
        },
        Ok(registry) => {
            let missing = registry
                .missing_keys()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            DoctorCheck {
                name: "template_registry",
                status: CheckStatus::Fail,
                details: format!("missing templates: {missing}"),
            }
        }
        Err(error) => DoctorCheck {
            name: "template_registry",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_mail_templates(config: &AppConfig) -> DoctorCheck {
    match MessageComposer::new(config.mail.internal_recipient.clone()) {
        Ok(composer) => DoctorCheck {
            name: "mail_templates",
            status: CheckStatus::Pass,
            details: format!("internal copies go to `{}`", composer.internal_recipient()),
        },
        Err(error) => {
            DoctorCheck { name: "mail_templates", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn check_store_credentials(config: &AppConfig) -> DoctorCheck {
    let mode = match config.store.auth {
        StoreAuth::Metadata => "metadata server token (resolved at request time)",
        StoreAuth::Static => "static access token",
        StoreAuth::RefreshToken => "OAuth2 refresh token",
    };

    match GoogleTemplateStore::from_config(&config.store, &config.oauth) {
        Ok(store) => DoctorCheck {
            name: "store_credentials",
            status: CheckStatus::Pass,
            details: format!("{mode}; working copies land in folder `{}`", store.workspace_folder_id()),
        },
        Err(error) => DoctorCheck {
            name: "store_credentials",
            status: CheckStatus::Fail,
            details: format!("{mode}: {error}"),
        },
    }
}

fn check_mail_credentials(config: &AppConfig) -> DoctorCheck {
    let mode = match config.mail.auth {
        MailAuth::OAuth2 => "XOAUTH2 with refresh token",
        MailAuth::Password => "username and password",
    };

    match SmtpMailSender::from_config(&config.mail, &config.oauth) {
        Ok(sender) => DoctorCheck {
            name: "mail_credentials",
            status: CheckStatus::Pass,
            details: format!(
                "{mode} via {}:{} as `{}`",
                config.mail.smtp_host,
                config.mail.smtp_port,
                sender.sender()
            ),
        },
        Err(error) => DoctorCheck {
            name: "mail_credentials",
            status: CheckStatus::Fail,
            details: format!("{mode}: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
