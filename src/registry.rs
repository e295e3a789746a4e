//! Session registry
//!
//! The only state shared between connections: a map from session id to the
//! handle of its scheduler, plus the scheduler task handles for shutdown.
//! Sessions themselves are never stored here, so the per-character path
//! never takes these locks.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::TypingError;
use crate::scheduler::SessionHandle;
use crate::types::{OwnerId, SessionId, SessionState};

/// Concurrency-safe store of session handles
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    tasks: Mutex<HashMap<SessionId, JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session
    ///
    /// Fails with `DuplicateSession` if the id is already present.
    pub fn insert(&self, handle: SessionHandle) -> Result<(), TypingError> {
        let mut sessions = lock(&self.sessions);
        if sessions.contains_key(&handle.id) {
            return Err(TypingError::DuplicateSession(handle.id));
        }
        debug!(session.id = %handle.id, total = sessions.len() + 1, "Session registered");
        sessions.insert(handle.id.clone(), handle);
        Ok(())
    }

    /// Look up a session
    pub fn get(&self, id: &SessionId) -> Result<SessionHandle, TypingError> {
        lock(&self.sessions)
            .get(id)
            .cloned()
            .ok_or_else(|| TypingError::UnknownSession(id.clone()))
    }

    /// Forget a session and its task handle
    pub fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        lock(&self.tasks).remove(id);
        lock(&self.sessions).remove(id)
    }

    /// Keep the scheduler task so shutdown can wait for it
    pub fn store_task(&self, id: &SessionId, task: JoinHandle<()>) {
        lock(&self.tasks).insert(id.clone(), task);
    }

    /// Take every stored scheduler task
    pub fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        lock(&self.tasks).drain().map(|(_, task)| task).collect()
    }

    pub fn list(&self) -> Vec<SessionHandle> {
        lock(&self.sessions).values().cloned().collect()
    }

    /// Sessions belonging to `owner`
    pub fn by_owner(&self, owner: &OwnerId) -> Vec<SessionHandle> {
        lock(&self.sessions)
            .values()
            .filter(|handle| &handle.owner_id == owner)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions that have been terminal, or idle, for at least `retention`
    ///
    /// Running and paused sessions are never evicted, nor are idle ones whose
    /// scheduler task has been spawned and is about to start.
    pub fn evict_expired(&self, now: Instant, retention: Duration) -> Vec<SessionId> {
        let mut sessions = lock(&self.sessions);
        let mut tasks = lock(&self.tasks);
        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|handle| {
                let status = handle.status();
                let since = match status.state {
                    SessionState::Idle if tasks.contains_key(&handle.id) => return false,
                    SessionState::Idle => handle.created_at,
                    state if state.is_terminal() => status.since,
                    _ => return false,
                };
                now.saturating_duration_since(since) >= retention
            })
            .map(|handle| handle.id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
            tasks.remove(id);
            debug!(session.id = %id, "Session evicted");
        }
        expired
    }
}
