use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::session::{DialogueState, Session};

pub const SESSION_IDLE_TIMEOUT_MINUTES: i64 = 10;

/// Explicit session map keyed by session id, owned by the coordinator.
/// Sessions are created on first use and evicted once idle past the timeout,
/// rather than accumulating for the life of the process.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_idle_timeout(Duration::minutes(SESSION_IDLE_TIMEOUT_MINUTES))
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Fetches a working copy of the session, creating it when absent.
    /// Each call also sweeps out idle sessions.
    pub async fn checkout(&self, session_id: &str, now: DateTime<Utc>) -> Session {
        let mut sessions = self.sessions.lock().await;
        let timeout = self.idle_timeout;
        sessions.retain(|id, session| {
            let keep = now - session.last_active <= timeout;
            if !keep {
                debug!(session_id = %id, "evicting idle session");
            }
            keep
        });
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, now))
            .clone()
    }

    pub async fn store(&self, session: Session) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session.session_id.clone(), session);
    }

    /// Abandons an in-flight turn (e.g. a speech call timed out) without
    /// discarding the session itself.
    pub async fn abandon_turn(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.state = DialogueState::AwaitingUtterance;
        }
    }

    pub async fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkout_creates_and_eviction_removes() {
        let store = SessionStore::with_idle_timeout(Duration::minutes(10));
        let start = Utc::now();

        let session = store.checkout("tab-1", start).await;
        assert_eq!(session.turn_count, 0);
        store.store(session).await;
        assert_eq!(store.len().await, 1);

        // A checkout past the idle window sweeps the stale session out.
        let later = start + Duration::minutes(11);
        let fresh = store.checkout("tab-2", later).await;
        store.store(fresh).await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn abandon_turn_resets_state_only() {
        let store = SessionStore::new();
        let now = Utc::now();
        let mut session = store.checkout("tab-1", now).await;
        session.state = DialogueState::Extracting;
        session.turn_count = 2;
        store.store(session).await;

        store.abandon_turn("tab-1").await;
        let session = store.checkout("tab-1", now).await;
        assert_eq!(session.state, DialogueState::AwaitingUtterance);
        assert_eq!(session.turn_count, 2);
    }
}
