use async_trait::async_trait;
use thiserror::Error;

use cabbot_core::domain::session::{Session, UserId};

pub mod memory;
pub mod sessions;

pub use memory::InMemorySessionRepository;
pub use sessions::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Durable copy of per-user conversation sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn load(&self, user_id: &UserId) -> Result<Option<Session>, RepositoryError>;
    async fn save(&self, session: &Session) -> Result<(), RepositoryError>;
    /// Returns whether a stored session was removed.
    async fn delete(&self, user_id: &UserId) -> Result<bool, RepositoryError>;
    /// Most recently active sessions first.
    async fn list(&self, limit: u32) -> Result<Vec<Session>, RepositoryError>;
}
