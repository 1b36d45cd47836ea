use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cabbot_core::config::SessionConfig;
use cabbot_core::domain::session::{Session, UserId};
use cabbot_db::SessionRepository;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

struct SlotState {
    session: Session,
    loaded: bool,
}

type Slot = Arc<tokio::sync::Mutex<SlotState>>;
type Shard = Mutex<HashMap<UserId, Slot>>;

/// Exclusive access to one user's session for the length of a turn.
pub struct SessionGuard {
    state: OwnedMutexGuard<SlotState>,
}

impl SessionGuard {
    pub fn user_id(&self) -> &UserId {
        &self.state.session.user_id
    }
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.state.session
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state.session
    }
}

/// Per-user sessions split across independently locked shards.
///
/// The shard mutex is only held to find or insert a slot; the per-user async mutex
/// inside the slot serializes turns for that user.
pub struct SessionStore {
    shards: Vec<Shard>,
    idle_timeout: Duration,
    repository: Option<Arc<dyn SessionRepository>>,
}

impl SessionStore {
    pub fn new(shards: usize, idle_timeout: Duration) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect();
        Self { shards, idle_timeout, repository: None }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.shards, config.idle_timeout())
    }

    pub fn with_repository(mut self, repository: Arc<dyn SessionRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Waits for the user's previous turn to finish, then hands out the session.
    /// Absent sessions are created (or loaded from the repository); idle ones start over.
    pub async fn lock(&self, user_id: &UserId) -> SessionGuard {
        let slot = self.slot(user_id);
        let mut state = slot.lock_owned().await;
        let now = Utc::now();

        if !state.loaded {
            if let Some(stored) = self.load_stored(user_id).await {
                state.session = stored;
            }
            state.loaded = true;
        }

        if state.session.is_expired(now, self.idle_timeout) {
            debug!(
                event_name = "session.expired",
                user_id = %user_id,
                idle_secs = self.idle_timeout.as_secs(),
                "idle session expired; starting over"
            );
            state.session = Session::new(user_id.clone(), now);
        }

        SessionGuard { state }
    }

    /// Returns a copy of the user's session, creating an empty one if absent.
    pub async fn get(&self, user_id: &UserId) -> Session {
        let guard = self.lock(user_id).await;
        guard.clone()
    }

    /// Applies `mutation` under the user's lock and persists the result.
    pub async fn update<F>(&self, user_id: &UserId, mutation: F) -> Session
    where
        F: FnOnce(&mut Session),
    {
        let mut guard = self.lock(user_id).await;
        mutation(&mut guard);
        guard.touch(Utc::now());
        self.commit(&guard).await;
        guard.clone()
    }

    /// Drops the user's session from memory and from the repository.
    pub async fn clear(&self, user_id: &UserId) {
        let slot = self.slot(user_id);
        let mut state = slot.clone().lock_owned().await;
        state.session = Session::new(user_id.clone(), Utc::now());
        state.loaded = true;

        if let Some(repository) = &self.repository {
            if let Err(error) = repository.delete(user_id).await {
                warn!(
                    event_name = "session.persistence.delete_failed",
                    user_id = %user_id,
                    error = %error,
                    "failed to delete stored session"
                );
            }
        }

        let mut shard = self.shard(user_id);
        let removable = shard
            .get(user_id)
            .is_some_and(|current| Arc::ptr_eq(current, &slot) && Arc::strong_count(&slot) <= 3);
        if removable {
            shard.remove(user_id);
        }
        drop(shard);
        drop(state);
    }

    /// Saves the session held by `guard`; failures are logged and never surface to the turn.
    pub async fn commit(&self, guard: &SessionGuard) {
        let Some(repository) = &self.repository else {
            return;
        };
        if let Err(error) = repository.save(guard).await {
            warn!(
                event_name = "session.persistence.save_failed",
                user_id = %guard.user_id(),
                error = %error,
                "failed to persist session"
            );
        }
    }

    /// Current state of the user's session without creating one.
    pub async fn snapshot(&self, user_id: &UserId) -> Option<Session> {
        let slot = self.shard(user_id).get(user_id).cloned();
        match slot {
            Some(slot) => {
                let state = slot.lock().await;
                state.loaded.then(|| state.session.clone())
            }
            None => self.load_stored(user_id).await,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.shards.iter().map(|shard| lock_shard(shard).len()).sum()
    }

    /// Removes idle sessions nobody is currently using; returns how many were dropped.
    pub async fn evict_idle(&self) -> usize {
        let now = Utc::now();
        let mut evicted = Vec::new();

        for shard in &self.shards {
            let mut sessions = lock_shard(shard);
            sessions.retain(|user_id, slot| {
                if Arc::strong_count(slot) > 1 {
                    return true;
                }
                let expired = match slot.try_lock() {
                    Ok(state) => state.session.is_expired(now, self.idle_timeout),
                    Err(_) => false,
                };
                if expired {
                    evicted.push(user_id.clone());
                }
                !expired
            });
        }

        if let Some(repository) = &self.repository {
            for user_id in &evicted {
                if let Err(error) = repository.delete(user_id).await {
                    warn!(
                        event_name = "session.persistence.delete_failed",
                        user_id = %user_id,
                        error = %error,
                        "failed to delete expired session"
                    );
                }
            }
        }

        if !evicted.is_empty() {
            debug!(event_name = "session.evicted", count = evicted.len(), "evicted idle sessions");
        }
        evicted.len()
    }

    fn slot(&self, user_id: &UserId) -> Slot {
        let mut shard = self.shard(user_id);
        shard
            .entry(user_id.clone())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(SlotState {
                    session: Session::new(user_id.clone(), Utc::now()),
                    loaded: false,
                }))
            })
            .clone()
    }

    fn shard(&self, user_id: &UserId) -> MutexGuard<'_, HashMap<UserId, Slot>> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        lock_shard(&self.shards[index])
    }

    async fn load_stored(&self, user_id: &UserId) -> Option<Session> {
        let repository = self.repository.as_ref()?;
        match repository.load(user_id).await {
            Ok(stored) => stored,
            Err(error) => {
                warn!(
                    event_name = "session.persistence.load_failed",
                    user_id = %user_id,
                    error = %error,
                    "failed to load stored session; starting fresh"
                );
                None
            }
        }
    }
}

fn lock_shard(shard: &Shard) -> MutexGuard<'_, HashMap<UserId, Slot>> {
    match shard.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
