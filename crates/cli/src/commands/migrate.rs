use cabbot_core::config::{AppConfig, LoadOptions};
use cabbot_db::{connect_from_config, migrations};

use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let report = migrations::apply(&pool).await;
        pool.close().await;
        report.map_err(|error| ("migration", error.to_string(), 5u8))
    });

    match result {
        Ok(report) => {
            let version = report
                .current_version
                .map(|version| version.to_string())
                .unwrap_or_else(|| "none".to_string());
            let message = if report.newly_applied.is_empty() {
                format!("session schema already at version {version} on `{}`", config.database.url)
            } else {
                format!(
                    "applied {} migration(s); session schema at version {version} on `{}`",
                    report.newly_applied.len(),
                    config.database.url
                )
            };
            CommandResult::success("migrate", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
