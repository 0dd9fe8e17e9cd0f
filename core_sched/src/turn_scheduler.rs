//! Turn clock for turn-based sessions and the administrative turn controls.

use std::io;
use std::sync::Arc;

use sched_schema::{Session, SessionId, SessionStatus};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::SchedulerError;
use crate::launcher::CommandLauncher;
use crate::metrics::{LoopKind, SchedulerMetrics};
use crate::poller::{spawn_poll_loop, LoopSettings, PollHandle};
use crate::repository::{SessionPatch, SessionRepository};
use crate::tracker::CompletionTracker;
use crate::turn_counter::TurnCounter;

pub struct TurnScheduler {
    sessions: Arc<dyn SessionRepository>,
    tracker: CompletionTracker,
    turns: TurnCounter,
    launcher: Arc<CommandLauncher>,
    clock: Arc<dyn Clock>,
    metrics: Arc<SchedulerMetrics>,
}

impl TurnScheduler {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        tracker: CompletionTracker,
        turns: TurnCounter,
        launcher: Arc<CommandLauncher>,
        clock: Arc<dyn Clock>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            sessions,
            tracker,
            turns,
            launcher,
            clock,
            metrics,
        }
    }

    pub fn start(self: &Arc<Self>, settings: LoopSettings) -> io::Result<PollHandle> {
        let scheduler = Arc::clone(self);
        spawn_poll_loop(
            "turn-scheduler",
            LoopKind::TurnScheduler,
            settings,
            Arc::clone(&self.metrics),
            move || scheduler.tick().map(|_| ()),
        )
    }

    /// Advances every running turn-based session whose interval has elapsed.
    /// Returns the sessions that moved to a new turn. A failing session is
    /// logged and counted; the first failure is returned after the pass.
    pub fn tick(&self) -> Result<Vec<(SessionId, u64)>, SchedulerError> {
        let now = self.clock.now_ms();
        let mut advanced = Vec::new();
        let mut first_error = None;
        for session in self.sessions.find_by_status(SessionStatus::Running)? {
            if !session.is_turn_based() {
                continue;
            }
            match self.tick_session(&session, now) {
                Ok(Some(turn)) => advanced.push((session.id.clone(), turn)),
                Ok(None) => {}
                Err(err) => {
                    self.metrics.record_session_error();
                    warn!(
                        target: "warfront::turns",
                        session_id = %session.id,
                        error = %err,
                        "turn.session_failed"
                    );
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(advanced),
        }
    }

    /// Moves the session to its next turn and starts the next queued command
    /// of every idle actor.
    pub fn advance_turn(&self, session_id: &SessionId) -> Result<u64, SchedulerError> {
        let session = self.turn_based_session(session_id)?;
        let turn = self.turns.increment(&session)?;
        self.finish_advance(&session, turn)
    }

    /// Pulls every in-flight command `turns` turns earlier, never below 0.
    pub fn accelerate_turn(&self, session_id: &SessionId, turns: i64) -> Result<usize, SchedulerError> {
        self.shift(session_id, turns, -1)
    }

    /// Pushes every in-flight command `turns` turns later.
    pub fn delay_turn(&self, session_id: &SessionId, turns: i64) -> Result<usize, SchedulerError> {
        self.shift(session_id, turns, 1)
    }

    pub fn get_current_turn(&self, session_id: &SessionId) -> Result<u64, SchedulerError> {
        let session = self.turn_based_session(session_id)?;
        Ok(self.turns.current(&session)?)
    }

    fn tick_session(&self, session: &Session, now: i64) -> Result<Option<u64>, SchedulerError> {
        let Some(last_turn_at) = session.last_turn_at else {
            // First sighting starts the interval instead of skipping a turn.
            self.sessions.update(
                &session.id,
                SessionPatch {
                    last_turn_at: Some(now),
                    ..SessionPatch::default()
                },
            )?;
            debug!(
                target: "warfront::turns",
                session_id = %session.id,
                "turn.clock_started"
            );
            return Ok(None);
        };
        let interval_ms = session.turn_interval_secs as i64 * 1_000;
        if now - last_turn_at < interval_ms {
            return Ok(None);
        }

        // The counter only moves if it still reads the turn this snapshot
        // saw, so two schedulers with the same snapshot advance once.
        let Some(turn) = self.turns.advance_from(session)? else {
            self.catch_up(session)?;
            return Ok(None);
        };
        self.finish_advance(session, turn).map(Some)
    }

    /// Brings a record that lags the shared counter up to date.
    fn catch_up(&self, session: &Session) -> Result<(), SchedulerError> {
        let turn = self.turns.current(session)?;
        debug!(
            target: "warfront::turns",
            session_id = %session.id,
            seen = session.current_turn,
            turn,
            "turn.advance_skipped=stale"
        );
        if turn > session.current_turn {
            self.sessions.update(
                &session.id,
                SessionPatch {
                    current_turn: Some(turn),
                    ..SessionPatch::default()
                },
            )?;
        }
        Ok(())
    }

    fn finish_advance(&self, session: &Session, turn: u64) -> Result<u64, SchedulerError> {
        let now = self.clock.now_ms();
        let session = self.sessions.update(
            &session.id,
            SessionPatch {
                current_turn: Some(turn),
                last_turn_at: Some(now),
                ..SessionPatch::default()
            },
        )?;
        self.metrics.record_turn_advanced();

        let started = self.launcher.start_idle_actors(&session)?;
        info!(
            target: "warfront::turns",
            session_id = %session.id,
            turn,
            started,
            "turn.advanced"
        );
        Ok(turn)
    }

    fn shift(&self, session_id: &SessionId, turns: i64, direction: i64) -> Result<usize, SchedulerError> {
        if turns <= 0 {
            return Err(SchedulerError::InvalidTurnShift(turns));
        }
        self.turn_based_session(session_id)?;
        let delta = turns.saturating_mul(direction);
        let shifted = self.tracker.shift_all(session_id, delta)?;
        info!(
            target: "warfront::turns",
            session_id = %session_id,
            delta,
            shifted,
            "turn.shifted"
        );
        Ok(shifted)
    }

    fn turn_based_session(&self, session_id: &SessionId) -> Result<Session, SchedulerError> {
        let session = self
            .sessions
            .find_by_id(session_id)?
            .ok_or_else(|| SchedulerError::SessionNotFound(session_id.clone()))?;
        if !session.is_turn_based() {
            return Err(SchedulerError::NotTurnBased(session_id.clone()));
        }
        Ok(session)
    }
}
