//! A session groups one user's in-flight tasks and event stream behind a
//! capability token (spec.md §4.10): capped per user at `max_per_user`,
//! oldest evicted first on overflow.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use sheet_common::config::{
    EventsConfig,
    SessionConfig,
};
use sheet_common::Capability;
use sheet_errors::ErrorMetadata;
use uuid::Uuid;

use crate::event::InMemoryEventStore;
use crate::task::TaskStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone)]
pub struct Session {
    pub id: SessionId,
    pub user_id: String,
    pub capability: Capability,
    pub tasks: Arc<TaskStore>,
    pub events: Arc<InMemoryEventStore>,
    created_at: Instant,
}

impl Session {
    pub fn is_expired(&self, ttl: std::time::Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

pub struct SessionStore {
    config: SessionConfig,
    events_config: EventsConfig,
    sessions: DashMap<SessionId, Session>,
    by_user: DashMap<String, VecDeque<SessionId>>,
}

impl SessionStore {
    pub fn new(config: SessionConfig, events_config: EventsConfig) -> Self {
        Self { config, events_config, sessions: DashMap::new(), by_user: DashMap::new() }
    }

    /// Creates a session for `user_id`, evicting that user's oldest session
    /// if this pushes them past `max_per_user`.
    pub fn create_session(&self, user_id: impl Into<String>, capability: Capability) -> Session {
        let user_id = user_id.into();
        let session = Session {
            id: SessionId::new(),
            user_id: user_id.clone(),
            capability,
            tasks: Arc::new(TaskStore::new()),
            events: Arc::new(InMemoryEventStore::new(self.events_config.clone())),
            created_at: Instant::now(),
        };

        let evicted = {
            let mut per_user = self.by_user.entry(user_id).or_default();
            per_user.push_back(session.id.clone());
            if per_user.len() > self.config.max_per_user {
                per_user.pop_front()
            } else {
                None
            }
        };
        if let Some(evicted_id) = evicted {
            self.sessions.remove(&evicted_id);
            sheet_metrics::session_store::log_session_evicted();
        }

        self.sessions.insert(session.id.clone(), session.clone());
        sheet_metrics::session_store::set_sessions_active(self.sessions.len() as i64);
        session
    }

    pub fn get(&self, id: &SessionId) -> anyhow::Result<Session> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| anyhow::anyhow!(ErrorMetadata::not_found(format!("session {id} not found"))))
    }

    pub fn end_session(&self, id: &SessionId) {
        if let Some((_, session)) = self.sessions.remove(id) {
            if let Some(mut per_user) = self.by_user.get_mut(&session.user_id) {
                per_user.retain(|existing| existing != id);
            }
            sheet_metrics::session_store::set_sessions_active(self.sessions.len() as i64);
        }
    }

    /// Sweeps sessions idle past `SessionConfig.default_ttl`. Intended to
    /// run on a periodic timer, mirroring `transaction::expire_overdue`.
    pub fn gc_expired(&self) -> usize {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(self.config.default_ttl))
            .map(|entry| entry.key().clone())
            .collect();
        let count = expired.len();
        for id in expired {
            self.end_session(&id);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn cap() -> Capability {
        Capability::for_test("user-1")
    }

    #[test]
    fn create_and_fetch_a_session() {
        let store = SessionStore::new(SessionConfig::default(), EventsConfig::default());
        let session = store.create_session("user-1", cap());
        let fetched = store.get(&session.id).unwrap();
        assert_eq!(fetched.user_id, "user-1");
    }

    #[test]
    fn per_user_overflow_evicts_the_oldest_session() {
        let config = SessionConfig { max_per_user: 2, default_ttl: Duration::from_secs(3600) };
        let store = SessionStore::new(config, EventsConfig::default());
        let first = store.create_session("user-1", cap());
        let _second = store.create_session("user-1", cap());
        let _third = store.create_session("user-1", cap());

        assert!(store.get(&first.id).is_err());
    }

    #[test]
    fn sessions_for_different_users_do_not_compete_for_the_cap() {
        let config = SessionConfig { max_per_user: 1, default_ttl: Duration::from_secs(3600) };
        let store = SessionStore::new(config, EventsConfig::default());
        let a = store.create_session("user-a", cap());
        let b = store.create_session("user-b", cap());
        assert!(store.get(&a.id).is_ok());
        assert!(store.get(&b.id).is_ok());
    }

    #[test]
    fn gc_expired_removes_stale_sessions() {
        let config = SessionConfig { max_per_user: 10, default_ttl: Duration::from_millis(0) };
        let store = SessionStore::new(config, EventsConfig::default());
        let session = store.create_session("user-1", cap());
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(store.gc_expired(), 1);
        assert!(store.get(&session.id).is_err());
    }
}
