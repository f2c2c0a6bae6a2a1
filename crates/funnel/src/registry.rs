use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use clearview_core::session::{QuoteSession, SessionId};

/// A live session plus the runtime state that does not belong in the pure
/// session record.
pub struct SessionEntry {
    pub session: QuoteSession,
    stalled_timer: Option<JoinHandle<()>>,
}

impl SessionEntry {
    pub fn new(session: QuoteSession) -> Self {
        Self { session, stalled_timer: None }
    }

    /// Installs a new timer, aborting any previous one first.
    pub fn replace_stalled_timer(&mut self, handle: JoinHandle<()>) {
        self.cancel_stalled_timer();
        self.stalled_timer = Some(handle);
    }

    pub fn cancel_stalled_timer(&mut self) -> bool {
        match self.stalled_timer.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn has_live_stalled_timer(&self) -> bool {
        self.stalled_timer.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Called by the timer task itself once it has run.
    pub(crate) fn clear_fired_timer(&mut self) {
        self.stalled_timer = None;
    }
}

impl Drop for SessionEntry {
    fn drop(&mut self) {
        self.cancel_stalled_timer();
    }
}

pub type SessionHandle = Arc<Mutex<SessionEntry>>;

/// In-process store of live sessions keyed by id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    idle_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), idle_ttl }
    }

    pub async fn insert(&self, session: QuoteSession) -> SessionHandle {
        let id = session.id.clone();
        let handle = Arc::new(Mutex::new(SessionEntry::new(session)));
        self.sessions.write().await.insert(id, handle.clone());
        handle
    }

    pub async fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops sessions with no activity since `now - idle_ttl`. Sessions that
    /// are busy right now are skipped. Returns how many were evicted.
    pub async fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.idle_ttl;
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (id, handle) in sessions.iter() {
            if let Ok(mut entry) = handle.try_lock() {
                if entry.session.last_activity_at < cutoff {
                    entry.cancel_stalled_timer();
                    expired.push(id.clone());
                }
            }
        }
        for id in &expired {
            sessions.remove(id);
        }
        expired.len()
    }
}
