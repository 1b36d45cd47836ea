use std::sync::Arc;
use std::time::Duration;

use cabbot_agent::SessionStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Periodically drops sessions idle past their TTL until `shutdown` flips to `true`.
pub fn spawn_idle_sweeper(
    sessions: Arc<SessionStore>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = sessions.evict_idle().await;
                    if evicted > 0 {
                        info!(
                            event_name = "session.sweep.completed",
                            correlation_id = "sweeper",
                            evicted,
                            active = sessions.active_sessions(),
                            "expired idle sessions"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use cabbot_agent::SessionStore;
    use cabbot_core::domain::session::UserId;
    use tokio::sync::watch;

    use super::spawn_idle_sweeper;

    #[tokio::test]
    async fn sweeper_evicts_idle_sessions_and_stops_on_shutdown() {
        let sessions = Arc::new(SessionStore::new(2, Duration::from_millis(20)));
        drop(sessions.lock(&UserId::new("U-IDLE")).await);
        assert_eq!(sessions.active_sessions(), 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_idle_sweeper(sessions.clone(), Duration::from_millis(10), shutdown_rx);

        for _ in 0..50 {
            if sessions.active_sessions() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sessions.active_sessions(), 0);

        shutdown_tx.send(true).expect("send shutdown");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper stops")
            .expect("sweeper task");
    }
}
