use async_trait::async_trait;
use cabbot_core::domain::session::{FilterSet, Session, SessionAction, UserId};
use cabbot_core::flows::FlowState;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use super::{RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn load(&self, user_id: &UserId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, state, filters_json, last_action, turn_count, page,
                   created_at, last_active_at
            FROM dialogue_sessions
            WHERE user_id = ?
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let filters_json = serde_json::to_string(&session.filters)
            .map_err(|error| RepositoryError::Decode(format!("encode filters: {error}")))?;
        let turn_count = i64::try_from(session.turn_count)
            .map_err(|_| RepositoryError::Decode("turn_count exceeds i64".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO dialogue_sessions (
                user_id, state, filters_json, last_action, turn_count, page,
                created_at, last_active_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                state = excluded.state,
                filters_json = excluded.filters_json,
                last_action = excluded.last_action,
                turn_count = excluded.turn_count,
                page = excluded.page,
                last_active_at = excluded.last_active_at
            "#,
        )
        .bind(session.user_id.as_str())
        .bind(session.state.as_str())
        .bind(filters_json)
        .bind(session.last_action.map(SessionAction::as_str))
        .bind(turn_count)
        .bind(i64::from(session.page))
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_active_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM dialogue_sessions WHERE user_id = ?")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, limit: u32) -> Result<Vec<Session>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, state, filters_json, last_action, turn_count, page,
                   created_at, last_active_at
            FROM dialogue_sessions
            ORDER BY last_active_at DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }
}

fn session_from_row(row: &SqliteRow) -> Result<Session, RepositoryError> {
    let user_id: String = row.try_get("user_id")?;
    let state: String = row.try_get("state")?;
    let filters_json: String = row.try_get("filters_json")?;
    let last_action: Option<String> = row.try_get("last_action")?;
    let turn_count: i64 = row.try_get("turn_count")?;
    let page: i64 = row.try_get("page")?;
    let created_at: String = row.try_get("created_at")?;
    let last_active_at: String = row.try_get("last_active_at")?;

    let filters: FilterSet = serde_json::from_str(&filters_json)
        .map_err(|error| RepositoryError::Decode(format!("filters for `{user_id}`: {error}")))?;

    Ok(Session {
        state: parse_state(&state)?,
        filters,
        last_action: last_action.as_deref().map(parse_action).transpose()?,
        turn_count: u64::try_from(turn_count)
            .map_err(|_| RepositoryError::Decode(format!("negative turn_count {turn_count}")))?,
        page: u32::try_from(page)
            .map_err(|_| RepositoryError::Decode(format!("page out of range: {page}")))?,
        created_at: parse_timestamp(&created_at)?,
        last_active_at: parse_timestamp(&last_active_at)?,
        user_id: UserId(user_id),
    })
}

fn parse_state(value: &str) -> Result<FlowState, RepositoryError> {
    match value {
        "idle" => Ok(FlowState::Idle),
        "collecting" => Ok(FlowState::Collecting),
        "awaiting_result" => Ok(FlowState::AwaitingResult),
        other => Err(RepositoryError::Decode(format!("unknown session state `{other}`"))),
    }
}

fn parse_action(value: &str) -> Result<SessionAction, RepositoryError> {
    match value {
        "query" => Ok(SessionAction::Query),
        "reset" => Ok(SessionAction::Reset),
        "unknown" => Ok(SessionAction::Unknown),
        other => Err(RepositoryError::Decode(format!("unknown session action `{other}`"))),
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("timestamp `{value}`: {error}")))
}

#[cfg(test)]
mod tests {
    use cabbot_core::domain::session::{Filter, Session, SessionAction, UserId};
    use cabbot_core::flows::FlowState;
    use chrono::{TimeZone, Utc};

    use super::SqlSessionRepository;
    use crate::migrations::run_pending;
    use crate::repositories::{RepositoryError, SessionRepository};
    use crate::{connect_with_settings, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        pool
    }

    fn collecting_session(user: &str, offset_secs: i64) -> Session {
        let now = Utc.timestamp_opt(1_760_000_000 + offset_secs, 0).single().expect("timestamp");
        let mut session = Session::new(UserId::new(user), now);
        session.filters.merge(Filter::city("Jaipur"));
        session.filters.merge(Filter::language("Hindi"));
        session.state = FlowState::Collecting;
        session.last_action = Some(SessionAction::Query);
        session.turn_count = 2;
        session.page = 2;
        session
    }

    #[tokio::test]
    async fn save_then_load_round_trips_session() {
        let repo = SqlSessionRepository::new(setup().await);
        let session = collecting_session("U100", 0);

        repo.save(&session).await.expect("save");
        let loaded = repo.load(&session.user_id).await.expect("load");

        assert_eq!(loaded, Some(session));
    }

    #[tokio::test]
    async fn save_upserts_and_keeps_created_at() {
        let repo = SqlSessionRepository::new(setup().await);
        let original = collecting_session("U100", 0);
        repo.save(&original).await.expect("first save");

        let mut updated = collecting_session("U100", 60);
        updated.reset(updated.last_active_at);
        repo.save(&updated).await.expect("second save");

        let loaded = repo.load(&updated.user_id).await.expect("load").expect("row exists");
        assert_eq!(loaded.state, FlowState::Idle);
        assert!(loaded.filters.is_empty());
        assert_eq!(loaded.created_at, original.created_at);
        assert_eq!(loaded.last_active_at, updated.last_active_at);
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_was_removed() {
        let repo = SqlSessionRepository::new(setup().await);
        let session = collecting_session("U200", 0);
        repo.save(&session).await.expect("save");

        assert!(repo.delete(&session.user_id).await.expect("delete"));
        assert!(!repo.delete(&session.user_id).await.expect("second delete"));
        assert_eq!(repo.load(&session.user_id).await.expect("load"), None);
    }

    #[tokio::test]
    async fn list_orders_by_recent_activity() {
        let repo = SqlSessionRepository::new(setup().await);
        repo.save(&collecting_session("U-old", 0)).await.expect("save old");
        repo.save(&collecting_session("U-new", 300)).await.expect("save new");
        repo.save(&collecting_session("U-mid", 100)).await.expect("save mid");

        let listed = repo.list(2).await.expect("list");
        let ids: Vec<&str> = listed.iter().map(|session| session.user_id.as_str()).collect();
        assert_eq!(ids, vec!["U-new", "U-mid"]);
    }

    #[tokio::test]
    async fn corrupt_rows_surface_decode_errors() {
        let pool = setup().await;
        sqlx::query(
            "INSERT INTO dialogue_sessions (user_id, state, filters_json, created_at, last_active_at)
             VALUES ('U-bad', 'idle', 'not json', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert corrupt row");

        let repo = SqlSessionRepository::new(pool);
        let error = repo.load(&UserId::new("U-bad")).await.expect_err("decode must fail");
        assert!(matches!(error, RepositoryError::Decode(_)));
    }
}
