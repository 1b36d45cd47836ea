use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use cabbot_agent::SessionStore;
use cabbot_db::DbPool;
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    sessions: Arc<SessionStore>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatabaseCheck {
    pub status: Readiness,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: Readiness,
    pub database: DatabaseCheck,
    pub active_sessions: usize,
    pub session_shards: usize,
    pub idle_timeout_secs: u64,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, sessions: Arc<SessionStore>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, sessions })
}

/// Session counts are always reported; only the database decides readiness.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = probe_database(&state.db_pool).await;
    let status = database.status;

    let payload = HealthResponse {
        status,
        database,
        active_sessions: state.sessions.active_sessions(),
        session_shards: state.sessions.shard_count(),
        idle_timeout_secs: state.sessions.idle_timeout().as_secs(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = match status {
        Readiness::Ready => StatusCode::OK,
        Readiness::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(payload))
}

async fn probe_database(pool: &DbPool) -> DatabaseCheck {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM dialogue_sessions").fetch_one(pool).await
    {
        Ok(stored) => DatabaseCheck {
            status: Readiness::Ready,
            detail: format!("{stored} stored session(s)"),
        },
        Err(error) => DatabaseCheck {
            status: Readiness::Degraded,
            detail: format!("session table query failed: {error}"),
        },
    }
}
