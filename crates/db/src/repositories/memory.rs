use std::collections::HashMap;

use tokio::sync::RwLock;

use cabbot_core::domain::session::{Session, UserId};

use super::{RepositoryError, SessionRepository};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionRepository {
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn load(&self, user_id: &UserId) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(user_id.as_str()).cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.user_id.0.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(user_id.as_str()).is_some())
    }

    async fn list(&self, limit: u32) -> Result<Vec<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let mut listed: Vec<Session> = sessions.values().cloned().collect();
        listed.sort_by(|left, right| right.last_active_at.cmp(&left.last_active_at));
        listed.truncate(limit as usize);
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use cabbot_core::domain::session::{Filter, Session, UserId};
    use cabbot_core::flows::FlowState;
    use chrono::{Duration, Utc};

    use crate::repositories::{InMemorySessionRepository, SessionRepository};

    #[tokio::test]
    async fn in_memory_session_repo_round_trip() {
        let repo = InMemorySessionRepository::default();
        let mut session = Session::new(UserId::new("U1"), Utc::now());
        session.filters.merge(Filter::city("Pune"));
        session.state = FlowState::Collecting;

        repo.save(&session).await.expect("save session");
        let found = repo.load(&session.user_id).await.expect("find session");

        assert_eq!(found, Some(session.clone()));
        assert!(repo.delete(&session.user_id).await.expect("delete"));
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn in_memory_list_is_most_recent_first() {
        let repo = InMemorySessionRepository::default();
        let now = Utc::now();
        repo.save(&Session::new(UserId::new("U-old"), now - Duration::minutes(5)))
            .await
            .expect("save");
        repo.save(&Session::new(UserId::new("U-new"), now)).await.expect("save");

        let listed = repo.list(10).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].user_id.as_str(), "U-new");
        assert_eq!(repo.list(1).await.expect("list").len(), 1);
    }
}
