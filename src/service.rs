//! Control surface
//!
//! Entry point for everything outside the playback core: validates start
//! requests, creates sessions and spawns their schedulers, and forwards
//! pause/resume/stop/speed changes to the owning scheduler as messages.
//! Validation errors are returned before the registry is touched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::delay::resolve_wpm;
use crate::error::TypingError;
use crate::message::StartRequest;
use crate::registry::SessionRegistry;
use crate::reporter::ProgressReporter;
use crate::scheduler::{PlaybackScheduler, SessionHandle, SessionStatus};
use crate::session::{Action, Session};
use crate::types::{OwnerId, SessionId, SessionState, Wpm};

/// Owner used when a start request carries no `user_id`
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// Listing entry for one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub owner_id: OwnerId,
    pub state: SessionState,
    pub progress: f64,
}

impl From<&SessionHandle> for SessionSummary {
    fn from(handle: &SessionHandle) -> Self {
        let status = handle.status();
        Self {
            session_id: handle.id.clone(),
            owner_id: handle.owner_id.clone(),
            state: status.state,
            progress: status.progress(),
        }
    }
}

/// Start/pause/resume/stop/update-speed operations over a shared registry
///
/// Cheap to clone; every clone drives the same sessions.
#[derive(Debug, Clone)]
pub struct TypingService {
    registry: Arc<SessionRegistry>,
    config: Arc<Config>,
    /// Per-session offset into the configured seed
    seed_offset: Arc<AtomicU64>,
}

impl TypingService {
    pub fn new(config: Config) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
            seed_offset: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Validate a start request, register the session and begin playback
    ///
    /// Events for the session go to `reporter`.
    pub fn start<R: ProgressReporter>(
        &self,
        request: StartRequest,
        reporter: R,
    ) -> Result<SessionId, TypingError> {
        let wpm = resolve_wpm(request.profile.as_deref(), request.custom_wpm)?;
        if request.text.is_empty() {
            return Err(TypingError::EmptyText);
        }

        let id = request.session_id.unwrap_or_else(SessionId::generate);
        let owner = request
            .user_id
            .unwrap_or_else(|| OwnerId::from(ANONYMOUS_OWNER));
        let session = Session::new(id.clone(), owner, &request.text, wpm)?;

        let (scheduler, handle) = PlaybackScheduler::new(
            session,
            reporter,
            self.session_rng(),
            self.config.progress_every,
            self.config.channel_buffer,
        );
        self.registry.insert(handle)?;

        let task_id = id.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = scheduler.run().await {
                error!(session.id = %task_id, "Session ended with error: {}", e);
            }
        });
        self.registry.store_task(&id, task);

        info!(session.id = %id, wpm = %wpm, "Session started");
        Ok(id)
    }

    pub async fn pause(&self, id: &SessionId) -> Result<(), TypingError> {
        self.control(id, Action::Pause, None).await
    }

    pub async fn resume(&self, id: &SessionId) -> Result<(), TypingError> {
        self.control(id, Action::Resume, None).await
    }

    pub async fn stop(&self, id: &SessionId) -> Result<(), TypingError> {
        self.control(id, Action::Stop, None).await
    }

    /// Change the target speed for characters not yet scheduled
    pub async fn update_wpm(&self, id: &SessionId, wpm: f64) -> Result<(), TypingError> {
        let wpm = Wpm::new(wpm)?;
        self.control(id, Action::UpdateWpm, Some(wpm)).await
    }

    async fn control(&self, id: &SessionId, action: Action, wpm: Option<Wpm>) -> Result<(), TypingError> {
        let handle = self.registry.get(id)?;
        handle.request(action, wpm).await?;
        Ok(())
    }

    /// Latest snapshot of a session
    pub fn status(&self, id: &SessionId) -> Result<SessionStatus, TypingError> {
        Ok(self.registry.get(id)?.status())
    }

    /// Wait for a session to finish
    ///
    /// Surfaces `TransportFailure` if the session was force-stopped.
    pub async fn wait(&self, id: &SessionId) -> Result<SessionStatus, TypingError> {
        self.registry.get(id)?.wait().await
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.registry.list().iter().map(SessionSummary::from).collect()
    }

    /// Stop every active session of `owner`, returning how many were stopped
    pub async fn stop_owner(&self, owner: &OwnerId) -> usize {
        let mut stopped = 0;
        for handle in self.registry.by_owner(owner) {
            if !handle.status().state.is_active() {
                continue;
            }
            match handle.request(Action::Stop, None).await {
                Ok(_) => stopped += 1,
                Err(e) => debug!(session.id = %handle.id, "Not stopped: {}", e),
            }
        }
        if stopped > 0 {
            info!(owner = %owner, stopped, "Stopped sessions of owner");
        }
        stopped
    }

    /// Evict sessions past the retention window
    pub fn evict_expired(&self) -> Vec<SessionId> {
        self.registry.evict_expired(Instant::now(), self.config.retention)
    }

    /// Periodically evict expired sessions
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(service.config.reap_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = service.evict_expired();
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), "Evicted expired sessions");
                }
            }
        })
    }

    /// Stop all active sessions and wait for their schedulers to exit
    pub async fn shutdown(&self) {
        let handles = self.registry.list();
        info!(sessions = handles.len(), "Shutting down typing service");

        for handle in handles {
            if handle.status().state.is_terminal() {
                continue;
            }
            let _ = handle.request(Action::Stop, None).await;
        }
        for task in self.registry.take_tasks() {
            let _ = task.await;
        }
    }

    fn session_rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => {
                let offset = self.seed_offset.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(seed.wrapping_add(offset))
            }
            None => StdRng::from_entropy(),
        }
    }
}
