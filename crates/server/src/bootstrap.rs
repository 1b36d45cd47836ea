use std::sync::Arc;

use cabbot_agent::{
    AgentRuntime, CachedDriverLookup, DriverLookup, HttpDriverLookup, LookupError,
    RuntimeSettings, SessionStore,
};
use cabbot_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use cabbot_core::config::{AppConfig, ConfigError};
use cabbot_db::{connect_from_config, migrations, DbPool, SqlSessionRepository};
use thiserror::Error;
use tracing::{info, warn};

use crate::slack_client::{NoopReplySink, ReplySink, SlackWebClient};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
    pub reply_sink: Arc<dyn ReplySink>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("driver lookup client could not be built: {0}")]
    Lookup(#[source] LookupError),
    #[error("slack client could not be built: {0}")]
    SlackClient(#[source] reqwest::Error),
}

/// Writes audit events to the log stream.
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                user_id = event.user_id.as_deref().unwrap_or("unknown"),
                category = ?event.category,
                actor = %event.actor,
                metadata = %metadata,
                "audit"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                user_id = event.user_id.as_deref().unwrap_or("unknown"),
                category = ?event.category,
                actor = %event.actor,
                outcome = ?event.outcome,
                metadata = %metadata,
                "audit"
            ),
        }
    }
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let mut sessions = SessionStore::from_config(&config.session);
    if config.database.persist_sessions {
        sessions = sessions.with_repository(Arc::new(SqlSessionRepository::new(db_pool.clone())));
    }

    let http_lookup = HttpDriverLookup::new(&config.lookup).map_err(BootstrapError::Lookup)?;
    let lookup: Arc<dyn DriverLookup> =
        Arc::new(CachedDriverLookup::new(http_lookup, config.lookup.cache_ttl()));

    let runtime = AgentRuntime::new(
        Arc::new(sessions),
        lookup,
        RuntimeSettings::from_config(&config.lookup),
    )
    .with_audit_sink(Arc::new(LogAuditSink));

    let reply_sink: Arc<dyn ReplySink> = if config.slack.has_bot_token() {
        Arc::new(SlackWebClient::from_config(&config.slack).map_err(BootstrapError::SlackClient)?)
    } else {
        Arc::new(NoopReplySink)
    };

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        persist_sessions = config.database.persist_sessions,
        slack_replies = config.slack.has_bot_token(),
        signed_requests = config.slack.signing_secret.is_some(),
        "application components wired"
    );

    Ok(Application { config, db_pool, runtime: Arc::new(runtime), reply_sink })
}
