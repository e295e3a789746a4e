//! Playback scheduler actor
//!
//! Each session runs in its own task. The task owns the `Session` and is its
//! only writer; control requests reach it as `Control` messages over an mpsc
//! channel and are answered through a oneshot. Observers read a `watch`
//! snapshot of the session instead of touching it.
//!
//! Per character the loop computes a delay, waits for it while staying
//! responsive to control messages, then emits the character. A pause freezes
//! the remaining part of the in-flight wait; a speed change only affects
//! delays computed after it; a stop ends the task without emitting the
//! character being waited on.

use std::time::Duration;

use rand::rngs::StdRng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::delay;
use crate::error::TypingError;
use crate::message::{CharEvent, ServerMessage};
use crate::reporter::ProgressReporter;
use crate::session::{Action, Session};
use crate::types::{OwnerId, SessionId, SessionState, Wpm};

/// Control request delivered to a running scheduler
#[derive(Debug)]
pub struct Control {
    pub action: Action,
    /// New speed, only for `Action::UpdateWpm`
    pub wpm: Option<Wpm>,
    pub reply: oneshot::Sender<Result<SessionState, TypingError>>,
}

/// Observable snapshot of a session, published by its scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub cursor: usize,
    pub total: usize,
    pub wpm: Wpm,
    /// Set when the progress sink failed and the session was force-stopped
    pub failure: Option<TypingError>,
    /// When `state` last changed
    pub since: Instant,
}

impl SessionStatus {
    fn of(session: &Session, failure: Option<TypingError>, since: Instant) -> Self {
        Self {
            state: session.state(),
            cursor: session.cursor(),
            total: session.total(),
            wpm: session.wpm,
            failure,
            since,
        }
    }

    /// Percent of characters emitted
    pub fn progress(&self) -> f64 {
        100.0 * self.cursor as f64 / self.total as f64
    }
}

/// Cloneable handle for talking to one session's scheduler
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub owner_id: OwnerId,
    pub created_at: Instant,
    control: mpsc::Sender<Control>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Latest published snapshot
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Ask the scheduler to perform `action`
    ///
    /// Once the scheduler has exited the session is terminal, so the request
    /// is rejected against the last published state.
    pub async fn request(&self, action: Action, wpm: Option<Wpm>) -> Result<SessionState, TypingError> {
        let (reply, response) = oneshot::channel();
        let sent = self.control.send(Control { action, wpm, reply }).await;
        if sent.is_ok() {
            if let Ok(result) = response.await {
                return result;
            }
        }
        Err(TypingError::InvalidStateTransition {
            from: self.status().state,
            action,
        })
    }

    /// Resolve once the session is terminal
    ///
    /// Returns `TransportFailure` if the session was force-stopped because
    /// its progress sink failed during playback. A stop acknowledgment that
    /// cannot be delivered is not a failure.
    pub async fn wait(&self) -> Result<SessionStatus, TypingError> {
        let mut status = self.status.clone();
        let waited = status
            .wait_for(|s| s.state.is_terminal())
            .await
            .map(|snapshot| snapshot.clone());
        let last = match waited {
            Ok(snapshot) => snapshot,
            Err(_) => status.borrow().clone(),
        };
        match last.failure {
            Some(err) => Err(err),
            None => Ok(last),
        }
    }
}

/// Drives one session from `Idle` to a terminal state
pub struct PlaybackScheduler<R: ProgressReporter> {
    session: Session,
    reporter: R,
    rng: StdRng,
    control: mpsc::Receiver<Control>,
    /// False once every handle is gone
    control_open: bool,
    status: watch::Sender<SessionStatus>,
    state_since: Instant,
    failure: Option<TypingError>,
    /// Emit `typing_progress` every N characters
    progress_every: usize,
}

impl<R: ProgressReporter> PlaybackScheduler<R> {
    /// Create a scheduler for an idle session along with its handle
    pub fn new(
        session: Session,
        reporter: R,
        rng: StdRng,
        progress_every: usize,
        control_buffer: usize,
    ) -> (Self, SessionHandle) {
        let now = Instant::now();
        let (control_tx, control_rx) = mpsc::channel(control_buffer.max(1));
        let (status_tx, status_rx) = watch::channel(SessionStatus::of(&session, None, now));

        let handle = SessionHandle {
            id: session.id.clone(),
            owner_id: session.owner_id.clone(),
            created_at: now,
            control: control_tx,
            status: status_rx,
        };

        let scheduler = Self {
            session,
            reporter,
            rng,
            control: control_rx,
            control_open: true,
            status: status_tx,
            state_since: now,
            failure: None,
            progress_every: progress_every.max(1),
        };

        (scheduler, handle)
    }

    /// Run playback to a terminal state
    ///
    /// A reporter failure force-stops the session and is returned.
    pub async fn run(mut self) -> Result<(), TypingError> {
        let id = self.session.id.clone();

        self.session.apply(Action::Start)?;
        self.publish();
        info!(
            session.id = %id,
            session.owner = %self.session.owner_id,
            total = self.session.total(),
            wpm = %self.session.wpm,
            "Playback started"
        );

        let result = self.play().await;

        if let Err(err) = &result {
            warn!(session.id = %id, error = %err, "Playback aborted, stopping session");
            self.session.force_stop();
            self.failure = Some(err.clone());
        }
        self.publish();

        info!(
            session.id = %id,
            state = %self.session.state(),
            cursor = self.session.cursor(),
            "Playback finished"
        );
        result
    }

    async fn play(&mut self) -> Result<(), TypingError> {
        self.reporter
            .send(ServerMessage::SessionStarted {
                session_id: self.session.id.clone(),
            })
            .await?;

        while let Some(character) = self.session.current_char() {
            self.drain_pending().await?;
            if !self.hold_while_paused().await? {
                return Ok(());
            }

            let delay = delay::delay(character, self.session.wpm, &mut self.rng);
            if !self.wait(Duration::from_millis(delay)).await? {
                return Ok(());
            }

            let event = CharEvent {
                character,
                index: self.session.cursor(),
                delay,
                total: self.session.total(),
            };
            trace!(session.id = %self.session.id, index = event.index, delay, "type_char");
            self.reporter.emit_char(&self.session.id, event).await?;
            self.session.advance();

            let cursor = self.session.cursor();
            if cursor % self.progress_every == 0 || self.session.is_finished() {
                self.reporter
                    .emit_progress(&self.session.id, self.session.progress())
                    .await?;
            }
            if !self.session.is_finished() {
                self.publish();
            }
        }

        self.reporter
            .emit_complete(&self.session.id, self.session.total())
            .await?;
        self.session.complete();
        Ok(())
    }

    /// Apply control messages already queued, without waiting
    async fn drain_pending(&mut self) -> Result<(), TypingError> {
        while self.control_open && !self.session.state().is_terminal() {
            match self.control.try_recv() {
                Ok(control) => self.handle_control(control).await?,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => self.control_open = false,
            }
        }
        Ok(())
    }

    /// Suspend until resumed; false if the session ended instead
    async fn hold_while_paused(&mut self) -> Result<bool, TypingError> {
        while self.session.state() == SessionState::Paused {
            match self.control.recv().await {
                Some(control) => self.handle_control(control).await?,
                None => {
                    // Nobody can resume us anymore
                    debug!(session.id = %self.session.id, "Control channel closed while paused");
                    self.control_open = false;
                    self.session.force_stop();
                }
            }
        }
        Ok(self.session.state() == SessionState::Running)
    }

    /// Wait out `delay`, serving control messages meanwhile
    ///
    /// Returns false if the session was stopped before the delay elapsed.
    async fn wait(&mut self, delay: Duration) -> Result<bool, TypingError> {
        let sleep = sleep_until(Instant::now() + delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                control = self.control.recv(), if self.control_open => {
                    match control {
                        Some(control) => self.handle_control(control).await?,
                        None => self.control_open = false,
                    }

                    if self.session.state() == SessionState::Paused {
                        let remaining = sleep.deadline().saturating_duration_since(Instant::now());
                        if !self.hold_while_paused().await? {
                            return Ok(false);
                        }
                        sleep.as_mut().reset(Instant::now() + remaining);
                    }
                    if self.session.state().is_terminal() {
                        return Ok(false);
                    }
                }
                _ = &mut sleep => return Ok(true),
            }
        }
    }

    /// Validate and apply one control request, then acknowledge it
    async fn handle_control(&mut self, control: Control) -> Result<(), TypingError> {
        let Control { action, wpm, reply } = control;

        let result = match (action, wpm) {
            (Action::UpdateWpm, Some(wpm)) => self.session.apply(action).map(|state| {
                self.session.wpm = wpm;
                state
            }),
            (Action::UpdateWpm, None) => Err(TypingError::InvalidWpm),
            _ => self.session.apply(action),
        };

        let accepted = result.is_ok();
        if accepted {
            info!(
                session.id = %self.session.id,
                action = %action,
                state = %self.session.state(),
                wpm = %self.session.wpm,
                "Control applied"
            );
            self.publish();
        } else {
            debug!(session.id = %self.session.id, action = %action, "Control rejected");
        }
        let _ = reply.send(result);

        if accepted {
            if let Some(ack) = ServerMessage::ack(self.session.id.clone(), action, self.session.wpm) {
                match self.reporter.send(ack).await {
                    Ok(()) => {}
                    // Already stopped, nothing left to deliver
                    Err(e) if action == Action::Stop => {
                        debug!(session.id = %self.session.id, "Stop acknowledgment not delivered: {}", e);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    fn publish(&mut self) {
        let state_changed = self.status.borrow().state != self.session.state();
        if state_changed {
            self.state_since = Instant::now();
        }
        let snapshot = SessionStatus::of(&self.session, self.failure.clone(), self.state_since);
        self.status.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::testing::{FailingReporter, RecordingReporter};
    use rand::SeedableRng;

    const TEXT: &str = "The quick brown fox jumps over the lazy dog today.";

    fn wpm(value: f64) -> Wpm {
        Wpm::new(value).unwrap()
    }

    fn scheduler<R: ProgressReporter>(
        text: &str,
        speed: f64,
        reporter: R,
        seed: u64,
    ) -> (PlaybackScheduler<R>, SessionHandle) {
        let session = Session::new(SessionId::generate(), OwnerId::from("tester"), text, wpm(speed)).unwrap();
        PlaybackScheduler::new(session, reporter, StdRng::seed_from_u64(seed), 5, 16)
    }

    /// Runs to completion and returns elapsed simulated milliseconds
    async fn run_alone(text: &str, speed: f64, seed: u64) -> (u128, RecordingReporter) {
        let reporter = RecordingReporter::new();
        let (scheduler, _handle) = scheduler(text, speed, reporter.clone(), seed);
        let started = Instant::now();
        scheduler.run().await.unwrap();
        (started.elapsed().as_millis(), reporter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_every_char_in_order() {
        let (elapsed, reporter) = run_alone(TEXT, 60.0, 1).await;

        let chars = reporter.chars();
        let typed: String = chars.iter().map(|(c, _, _)| *c).collect();
        assert_eq!(typed, TEXT);
        for (i, (_, index, _)) in chars.iter().enumerate() {
            assert_eq!(*index, i);
        }

        let messages = reporter.messages();
        assert!(matches!(
            messages.last(),
            Some(ServerMessage::TypingComplete { total_chars, .. }) if *total_chars == TEXT.len()
        ));

        // Elapsed time is the sum of the announced delays
        let total_delay: u64 = chars.iter().map(|(_, _, d)| *d).sum();
        assert!((elapsed as i128 - total_delay as i128).abs() <= TEXT.len() as i128, "{} vs {}", elapsed, total_delay);

        // 10 words at 60 WPM is about 10 seconds
        assert!(elapsed > 7_500 && elapsed < 13_500, "elapsed {}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_faster_speed_finishes_sooner() {
        let (slow, _) = run_alone(TEXT, 60.0, 2).await;
        let (fast, _) = run_alone(TEXT, 200.0, 2).await;

        assert!(fast > 2_200 && fast < 4_100, "fast {}", fast);
        let ratio = slow as f64 / fast as f64;
        assert!(ratio > 3.0 && ratio < 3.7, "ratio {}", ratio);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic() {
        let (_, reporter) = run_alone(TEXT, 200.0, 3).await;

        let progress: Vec<f64> = reporter
            .messages()
            .into_iter()
            .filter_map(|msg| match msg {
                ServerMessage::TypingProgress { progress, .. } => Some(progress),
                _ => None,
            })
            .collect();
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert!(progress.iter().all(|p| (0.0..=100.0).contains(p)));
        assert_eq!(progress.last(), Some(&100.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let (unpaused, _) = run_alone(TEXT, 60.0, 4).await;

        let reporter = RecordingReporter::new();
        let (scheduler, handle) = scheduler(TEXT, 60.0, reporter.clone(), 4);
        let started = Instant::now();
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.request(Action::Pause, None).await, Ok(SessionState::Paused));
        let paused_at = handle.status();
        assert_eq!(paused_at.state, SessionState::Paused);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.status().cursor, paused_at.cursor);
        assert!(matches!(
            handle.request(Action::Pause, None).await,
            Err(TypingError::InvalidStateTransition { from: SessionState::Paused, .. })
        ));
        assert_eq!(handle.request(Action::Resume, None).await, Ok(SessionState::Running));

        task.await.unwrap().unwrap();
        let elapsed = started.elapsed().as_millis();
        assert!((elapsed as i128 - (unpaused as i128 + 1_000)).abs() <= 60, "{} vs {}", elapsed, unpaused);

        // Nothing typed between the pause and resume acknowledgments
        let messages = reporter.messages();
        let pause = messages
            .iter()
            .position(|m| matches!(m, ServerMessage::PauseCommand { .. }))
            .unwrap();
        let resume = messages
            .iter()
            .position(|m| matches!(m, ServerMessage::ResumeCommand { .. }))
            .unwrap();
        assert_eq!(resume, pause + 1);

        let typed: String = reporter.chars().iter().map(|(c, _, _)| *c).collect();
        assert_eq!(typed, TEXT);
        assert_eq!(handle.wait().await.unwrap().state, SessionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_wait() {
        let reporter = RecordingReporter::new();
        let (scheduler, handle) = scheduler(TEXT, 60.0, reporter.clone(), 5);
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(handle.request(Action::Stop, None).await, Ok(SessionState::Stopped));
        task.await.unwrap().unwrap();

        let status = handle.wait().await.unwrap();
        assert_eq!(status.state, SessionState::Stopped);
        assert!(status.cursor < TEXT.len());

        let messages = reporter.messages();
        assert!(matches!(messages.last(), Some(ServerMessage::StopCommand { stopped: true, .. })));
        assert!(!messages.iter().any(|m| matches!(m, ServerMessage::TypingComplete { .. })));
        assert_eq!(reporter.chars().len(), status.cursor);

        for action in [Action::Resume, Action::Pause, Action::Stop] {
            assert_eq!(
                handle.request(action, None).await,
                Err(TypingError::InvalidStateTransition {
                    from: SessionState::Stopped,
                    action,
                })
            );
        }
        assert_eq!(handle.status().cursor, status.cursor);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_paused() {
        let reporter = RecordingReporter::new();
        let (scheduler, handle) = scheduler(TEXT, 200.0, reporter.clone(), 6);
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.request(Action::Pause, None).await.unwrap();
        let cursor = handle.status().cursor;
        handle.request(Action::Stop, None).await.unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(handle.status().cursor, cursor);
        assert_eq!(handle.status().state, SessionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_change_applies_to_later_chars() {
        let old = wpm(60.0);
        let new = wpm(300.0);
        let seed = 7;

        let reporter = RecordingReporter::new();
        let (scheduler, handle) = scheduler(TEXT, old.get(), reporter.clone(), seed);
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(handle.request(Action::UpdateWpm, Some(new)).await, Ok(SessionState::Running));
        task.await.unwrap().unwrap();
        assert_eq!(handle.status().wpm, new);

        let messages = reporter.messages();
        let ack = messages
            .iter()
            .position(|m| matches!(m, ServerMessage::SpeedUpdated { .. }))
            .unwrap();
        let positions: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| matches!(m, ServerMessage::TypeChar { .. }))
            .map(|(pos, _)| pos)
            .collect();

        // Same seed, same multiplier draws: replay both speeds side by side
        let mut replay = StdRng::seed_from_u64(seed);
        for (i, (c, _, d)) in reporter.chars().into_iter().enumerate() {
            let mut alt = replay.clone();
            let with_old = delay::delay(c, old, &mut replay);
            let with_new = delay::delay(c, new, &mut alt);

            if positions[i] < ack {
                assert_eq!(d, with_old, "char {} computed before the change", i);
            } else if i > 0 && positions[i - 1] > ack {
                assert_eq!(d, with_new, "char {} computed after the change", i);
            } else {
                assert!(d == with_old || d == with_new, "char {} in flight", i);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_wpm_rejected_after_stop() {
        let (scheduler, handle) = scheduler(TEXT, 60.0, RecordingReporter::new(), 8);
        let task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.request(Action::Stop, None).await.unwrap();
        task.await.unwrap().unwrap();

        let err = handle.request(Action::UpdateWpm, Some(wpm(90.0))).await.unwrap_err();
        assert!(matches!(err, TypingError::InvalidStateTransition { from: SessionState::Stopped, .. }));
        assert_eq!(handle.status().wpm, wpm(60.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_stops_session() {
        let reporter = FailingReporter::after(3);
        let (scheduler, handle) = scheduler(TEXT, 200.0, reporter.clone(), 9);

        let result = scheduler.run().await;
        assert!(matches!(result, Err(TypingError::TransportFailure(_))));

        let status = handle.status();
        assert_eq!(status.state, SessionState::Stopped);
        assert!(matches!(handle.wait().await, Err(TypingError::TransportFailure(_))));
        assert!(!reporter
            .recorded()
            .iter()
            .any(|m| matches!(m, ServerMessage::TypingComplete { .. })));
        assert!(status.cursor <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undelivered_stop_ack_is_not_a_failure() {
        // Only session_started gets through
        let reporter = FailingReporter::after(1);
        let (scheduler, handle) = scheduler(TEXT, 60.0, reporter.clone(), 12);
        let task = tokio::spawn(scheduler.run());

        assert_eq!(handle.request(Action::Stop, None).await, Ok(SessionState::Stopped));
        assert!(task.await.unwrap().is_ok());

        let status = handle.wait().await.unwrap();
        assert_eq!(status.state, SessionState::Stopped);
        assert!(status.failure.is_none());
        assert_eq!(status.cursor, 0);
        assert_eq!(reporter.recorded().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_run_independently() {
        let (solo_slow, _) = run_alone(TEXT, 60.0, 10).await;
        let (solo_fast, _) = run_alone("Zebras quickly vex; jolly mages fight!", 200.0, 11).await;

        let slow_reporter = RecordingReporter::new();
        let fast_reporter = RecordingReporter::new();
        let (slow, slow_handle) = scheduler(TEXT, 60.0, slow_reporter.clone(), 10);
        let (fast, fast_handle) =
            scheduler("Zebras quickly vex; jolly mages fight!", 200.0, fast_reporter.clone(), 11);

        let started = Instant::now();
        let slow_task = tokio::spawn(async move {
            slow.run().await.unwrap();
            Instant::now()
        });
        let fast_task = tokio::spawn(async move {
            fast.run().await.unwrap();
            Instant::now()
        });

        let fast_done = fast_task.await.unwrap().duration_since(started).as_millis();
        let slow_done = slow_task.await.unwrap().duration_since(started).as_millis();

        assert!((fast_done as i128 - solo_fast as i128).abs() <= 50);
        assert!((slow_done as i128 - solo_slow as i128).abs() <= 50);
        assert!(fast_done < slow_done);
        assert_eq!(slow_handle.status().state, SessionState::Completed);
        assert_eq!(fast_handle.status().state, SessionState::Completed);
    }
}
