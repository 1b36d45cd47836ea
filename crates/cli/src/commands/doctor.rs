use cabbot_core::config::{AppConfig, LoadOptions};
use cabbot_db::connect_from_config;
use serde::Serialize;

use crate::commands::CommandResult;

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

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

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
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.push(check_slack_replies(&config));
            checks.push(check_request_signing(&config));
            checks.push(check_lookup_endpoint(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in
                ["slack_replies", "request_signing", "lookup_endpoint", "database_connectivity"]
            {
                checks.push(DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    // Optional integrations report `skipped`; only failures make the doctor unhappy.
    let healthy = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if healthy { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if healthy {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_slack_replies(config: &AppConfig) -> DoctorCheck {
    if config.slack.has_bot_token() {
        DoctorCheck::new(
            "slack_replies",
            CheckStatus::Pass,
            format!("bot token present; replies go through {}", config.slack.api_base_url),
        )
    } else {
        DoctorCheck::new(
            "slack_replies",
            CheckStatus::Skipped,
            "no bot token; Slack event replies are dropped (HTTP answers still work)",
        )
    }
}

fn check_request_signing(config: &AppConfig) -> DoctorCheck {
    if config.slack.signing_secret.is_some() {
        DoctorCheck::new(
            "request_signing",
            CheckStatus::Pass,
            "slack requests must carry a valid signature",
        )
    } else {
        DoctorCheck::new(
            "request_signing",
            CheckStatus::Skipped,
            "no signing secret; slack requests are accepted unsigned",
        )
    }
}

fn check_lookup_endpoint(config: &AppConfig) -> DoctorCheck {
    let endpoint = config.lookup.endpoint_url.trim();
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        DoctorCheck::new(
            "lookup_endpoint",
            CheckStatus::Pass,
            format!(
                "driver lookups go to `{endpoint}` (timeout {}s, cache {}s)",
                config.lookup.timeout_secs, config.lookup.cache_ttl_secs
            ),
        )
    } else {
        DoctorCheck::new(
            "lookup_endpoint",
            CheckStatus::Fail,
            format!("`{endpoint}` is not an http(s) url"),
        )
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::new(
                "database_connectivity",
                CheckStatus::Fail,
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;

        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => DoctorCheck::new("database_connectivity", CheckStatus::Fail, error),
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
