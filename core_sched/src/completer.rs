//! Polling completer: finalizes commands whose due-score has passed and
//! starts each actor's next queued command.

use std::io;
use std::sync::Arc;

use sched_schema::{CommandId, CommandStatus, Session, SessionStatus};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::SchedulerError;
use crate::execution_queue::ExecutionQueues;
use crate::launcher::CommandLauncher;
use crate::metrics::{LoopKind, SchedulerMetrics};
use crate::poller::{spawn_poll_loop, LoopSettings, PollHandle};
use crate::repository::{CommandRepository, SessionRepository, StatusUpdate};
use crate::store::Score;
use crate::tracker::CompletionTracker;
use crate::turn_counter::TurnCounter;

/// What one completer pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionReport {
    pub sessions: usize,
    pub completed: usize,
    pub started: usize,
    pub skipped: usize,
}

impl CompletionReport {
    fn absorb(&mut self, other: CompletionReport) {
        self.sessions += other.sessions;
        self.completed += other.completed;
        self.started += other.started;
        self.skipped += other.skipped;
    }
}

pub struct CommandCompleter {
    sessions: Arc<dyn SessionRepository>,
    commands: Arc<dyn CommandRepository>,
    queues: ExecutionQueues,
    tracker: CompletionTracker,
    turns: TurnCounter,
    launcher: Arc<CommandLauncher>,
    clock: Arc<dyn Clock>,
    metrics: Arc<SchedulerMetrics>,
}

impl CommandCompleter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        commands: Arc<dyn CommandRepository>,
        queues: ExecutionQueues,
        tracker: CompletionTracker,
        turns: TurnCounter,
        launcher: Arc<CommandLauncher>,
        clock: Arc<dyn Clock>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            sessions,
            commands,
            queues,
            tracker,
            turns,
            launcher,
            clock,
            metrics,
        }
    }

    /// Spawns the polling thread.
    pub fn start(self: &Arc<Self>, settings: LoopSettings) -> io::Result<PollHandle> {
        let completer = Arc::clone(self);
        if let Err(err) = completer.recover_untracked() {
            warn!(target: "warfront::completer", error = %err, "completer.recovery_failed");
        }
        spawn_poll_loop(
            "command-completer",
            LoopKind::Completer,
            settings,
            Arc::clone(&self.metrics),
            move || completer.tick().map(|_| ()),
        )
    }

    /// One pass over every running session. A session that fails is logged
    /// and counted without holding up the others; the first failure is
    /// returned once every session has had its turn.
    pub fn tick(&self) -> Result<CompletionReport, SchedulerError> {
        let mut report = CompletionReport::default();
        let mut first_error = None;
        for session in self.sessions.find_by_status(SessionStatus::Running)? {
            match self.complete_session(&session) {
                Ok(session_report) => report.absorb(session_report),
                Err(err) => {
                    self.metrics.record_session_error();
                    warn!(
                        target: "warfront::completer",
                        session_id = %session.id,
                        error = %err,
                        "completer.session_failed"
                    );
                    first_error.get_or_insert(err);
                }
            }
        }
        if report.completed > 0 || report.started > 0 {
            debug!(
                target: "warfront::completer",
                sessions = report.sessions,
                completed = report.completed,
                started = report.started,
                skipped = report.skipped,
                "completer.tick"
            );
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Milliseconds for realtime sessions, the current turn for turn-based.
    pub fn threshold(&self, session: &Session) -> Result<Score, SchedulerError> {
        if session.is_turn_based() {
            Ok(self.turns.current(session)? as Score)
        } else {
            Ok(self.clock.now_ms())
        }
    }

    /// Completes every due command of one session, then sweeps its idle
    /// actors. A failing command does not stop the rest.
    pub fn complete_session(&self, session: &Session) -> Result<CompletionReport, SchedulerError> {
        let mut report = CompletionReport {
            sessions: 1,
            ..CompletionReport::default()
        };
        let threshold = self.threshold(session)?;
        let mut first_error = None;
        for (command_id, score) in self.tracker.due_before(&session.id, threshold)? {
            if let Err(err) = self.complete_one(session, &command_id, score, &mut report) {
                warn!(
                    target: "warfront::completer",
                    session_id = %session.id,
                    command_id = %command_id,
                    error = %err,
                    "command.complete_failed"
                );
                first_error.get_or_insert(err);
            }
        }
        report.started += self.launcher.start_idle_actors(session)?;
        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    fn complete_one(
        &self,
        session: &Session,
        command_id: &CommandId,
        score: Score,
        report: &mut CompletionReport,
    ) -> Result<(), SchedulerError> {
        let Some(command) = self.commands.find_by_id(command_id)? else {
            warn!(
                target: "warfront::completer",
                session_id = %session.id,
                command_id = %command_id,
                "command.complete_skipped=missing"
            );
            self.tracker.untrack(&session.id, command_id)?;
            self.metrics.record_skipped();
            report.skipped += 1;
            return Ok(());
        };

        // Removing the entry is the claim: a concurrent poller that loses it
        // leaves the command alone. Until the status is written, a failure
        // puts the entry back.
        if !self.tracker.untrack(&session.id, command_id)? {
            debug!(
                target: "warfront::completer",
                command_id = %command_id,
                "command.complete_skipped=claimed_elsewhere"
            );
            return Ok(());
        }

        let actor = command.actor_id.clone();
        if command.status != CommandStatus::Executing {
            warn!(
                target: "warfront::completer",
                session_id = %session.id,
                command_id = %command_id,
                status = ?command.status,
                "command.complete_skipped=not_executing"
            );
            self.metrics.record_skipped();
            report.skipped += 1;
            if matches!(
                command.status,
                CommandStatus::Pending | CommandStatus::Scheduled
            ) {
                // A start rolled back during an outage that never reached the
                // queue: hand the command back to its actor.
                if let Err(err) = self.queues.requeue_front(&session.id, &actor, command_id) {
                    self.retrack(session, command_id, score);
                    return Err(err.into());
                }
            } else {
                self.queues.clear_current(&session.id, &actor, command_id)?;
            }
            return Ok(());
        }

        let now = self.clock.now_ms();
        if let Err(err) = self
            .commands
            .update_status(command_id, StatusUpdate::completed(now, command.result.clone()))
        {
            self.retrack(session, command_id, score);
            return Err(err.into());
        }
        self.metrics.record_completed();
        report.completed += 1;
        info!(
            target: "warfront::completer",
            session_id = %session.id,
            actor_id = %actor,
            command_id = %command_id,
            due_score = command.due_score,
            completed_at = now,
            "command.completed"
        );

        // A pointer left behind here is released by the next start attempt.
        self.queues.clear_current(&session.id, &actor, command_id)?;
        if self.launcher.start_next(session, &actor)?.is_some() {
            report.started += 1;
        }
        Ok(())
    }

    fn retrack(&self, session: &Session, command_id: &CommandId, score: Score) {
        match self.tracker.track(&session.id, command_id, score) {
            Ok(()) => debug!(
                target: "warfront::completer",
                command_id = %command_id,
                due_score = score,
                "command.retracked"
            ),
            Err(err) => warn!(
                target: "warfront::completer",
                session_id = %session.id,
                command_id = %command_id,
                error = %err,
                "command.retrack_failed"
            ),
        }
    }

    /// Re-tracks EXECUTING commands of running sessions that lost their
    /// tracker entry, e.g. after a poller died between claiming and
    /// completing them.
    pub fn recover_untracked(&self) -> Result<usize, SchedulerError> {
        let mut recovered = 0;
        for command in self.commands.find_executing()? {
            let Some(session) = self.sessions.find_by_id(&command.session_id)? else {
                continue;
            };
            if !session.is_running() {
                continue;
            }
            if self.tracker.score(&session.id, &command.id)?.is_some() {
                continue;
            }
            let score = match command.due_score {
                Some(score) => score,
                None => self.threshold(&session)?,
            };
            self.tracker.track(&session.id, &command.id, score)?;
            self.queues
                .set_current(&session.id, &command.actor_id, &command.id)?;
            recovered += 1;
            info!(
                target: "warfront::completer",
                session_id = %session.id,
                command_id = %command.id,
                due_score = score,
                "command.recovered"
            );
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::clock::ManualClock;
    use crate::config::SchedulerConfig;
    use crate::repository::{MemoryCommandRepository, MemorySessionRepository, RepositoryError};
    use crate::store::{KeyValueStore, MemoryStore};
    use crate::SchedulerRuntime;
    use sched_schema::{ActorId, Command, CommandType, SessionId};
    use serde_json::json;

    /// Command store whose next status writes fail, and whose lookup of one
    /// chosen id fails once.
    #[derive(Default)]
    struct FlakyCommands {
        inner: MemoryCommandRepository,
        failing_updates: AtomicU32,
        failing_lookup: parking_lot::Mutex<Option<CommandId>>,
    }

    impl CommandRepository for FlakyCommands {
        fn insert(&self, command: Command) -> Result<(), RepositoryError> {
            self.inner.insert(command)
        }

        fn find_by_id(&self, id: &CommandId) -> Result<Option<Command>, RepositoryError> {
            let mut failing = self.failing_lookup.lock();
            if failing.as_ref() == Some(id) {
                failing.take();
                return Err(RepositoryError::Unavailable("record store restarting".into()));
            }
            drop(failing);
            self.inner.find_by_id(id)
        }

        fn update_status(
            &self,
            id: &CommandId,
            update: StatusUpdate,
        ) -> Result<Command, RepositoryError> {
            let failing = self.failing_updates.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_updates.store(failing - 1, Ordering::SeqCst);
                return Err(RepositoryError::Unavailable("record store restarting".into()));
            }
            self.inner.update_status(id, update)
        }

        fn find_executing(&self) -> Result<Vec<Command>, RepositoryError> {
            self.inner.find_executing()
        }

        fn find_completable(&self, before: i64) -> Result<Vec<Command>, RepositoryError> {
            self.inner.find_completable(before)
        }
    }

    struct Wired {
        runtime: SchedulerRuntime,
        store: Arc<MemoryStore>,
        commands: Arc<FlakyCommands>,
        clock: Arc<ManualClock>,
    }

    fn wired(sessions: &[Session]) -> Wired {
        let store = Arc::new(MemoryStore::new());
        let commands = Arc::new(FlakyCommands::default());
        let clock = Arc::new(ManualClock::new(0));
        let runtime = SchedulerRuntime::new(
            SchedulerConfig::builtin(),
            store.clone(),
            store.clone(),
            commands.clone(),
            Arc::new(MemorySessionRepository::new()),
            clock.clone(),
        );
        for session in sessions {
            runtime.sessions().insert(session.clone()).unwrap();
        }
        Wired {
            runtime,
            store,
            commands,
            clock,
        }
    }

    fn status(runtime: &SchedulerRuntime, id: &str) -> CommandStatus {
        runtime
            .commands()
            .find_by_id(&id.into())
            .unwrap()
            .unwrap()
            .status
    }

    fn realtime_runtime() -> (SchedulerRuntime, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let runtime = SchedulerRuntime::in_memory(SchedulerConfig::builtin(), clock.clone());
        runtime.sessions().insert(Session::realtime("S1")).unwrap();
        (runtime, clock)
    }

    fn train(id: &str) -> Command {
        Command::new(id, "S1", "A1", CommandType::Train, json!({"unit": "pikemen"}))
    }

    #[test]
    fn completes_due_command_and_starts_the_next_one() {
        let (runtime, clock) = realtime_runtime();
        let session = SessionId::from("S1");
        let actor = ActorId::from("A1");
        runtime.submit(train("c1")).unwrap();
        runtime.submit(train("c2")).unwrap();

        clock.set(299_999);
        let early = runtime.completer().tick().unwrap();
        assert_eq!(early.completed, 0);

        clock.set(300_001);
        let report = runtime.completer().tick().unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(report.started, 1);
        let c1 = runtime.commands().find_by_id(&"c1".into()).unwrap().unwrap();
        assert_eq!(c1.status, CommandStatus::Completed);
        assert_eq!(c1.completion_time, Some(300_001));
        assert_eq!(
            runtime.queues().current(&session, &actor).unwrap(),
            Some(CommandId::from("c2"))
        );
        assert_eq!(
            runtime.tracker().entries(&session).unwrap(),
            vec![(CommandId::from("c2"), 600_001)]
        );
    }

    #[test]
    fn second_pass_at_the_same_instant_is_a_no_op() {
        let (runtime, clock) = realtime_runtime();
        runtime.submit(train("c1")).unwrap();
        clock.set(300_000);

        let first = runtime.completer().tick().unwrap();
        let second = runtime.completer().tick().unwrap();

        assert_eq!(first.completed, 1);
        assert_eq!(second.completed, 0);
        assert_eq!(runtime.metrics().snapshot().commands_completed, 1);
    }

    #[test]
    fn command_cancelled_in_flight_is_skipped_and_actor_released() {
        let (runtime, clock) = realtime_runtime();
        let session = SessionId::from("S1");
        runtime.submit(train("c1")).unwrap();
        runtime.submit(train("c2")).unwrap();
        runtime
            .commands()
            .update_status(&"c1".into(), StatusUpdate::cancelled(10))
            .unwrap();

        clock.set(300_000);
        let report = runtime.completer().tick().unwrap();

        assert_eq!(report.completed, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.started, 1);
        let c1 = runtime.commands().find_by_id(&"c1".into()).unwrap().unwrap();
        assert_eq!(c1.status, CommandStatus::Cancelled);
        assert_eq!(
            runtime.queues().current(&session, &"A1".into()).unwrap(),
            Some(CommandId::from("c2"))
        );
    }

    #[test]
    fn paused_sessions_are_left_alone() {
        let (runtime, clock) = realtime_runtime();
        runtime.submit(train("c1")).unwrap();
        runtime
            .sessions()
            .update(
                &"S1".into(),
                crate::repository::SessionPatch {
                    status: Some(SessionStatus::Paused),
                    ..Default::default()
                },
            )
            .unwrap();

        clock.set(1_000_000);
        let report = runtime.completer().tick().unwrap();

        assert_eq!(report, CompletionReport::default());
    }

    #[test]
    fn recovery_retracks_executing_commands() {
        let (runtime, _clock) = realtime_runtime();
        let session = SessionId::from("S1");
        runtime.submit(train("c1")).unwrap();
        runtime.tracker().untrack(&session, &"c1".into()).unwrap();

        let recovered = runtime.completer().recover_untracked().unwrap();

        assert_eq!(recovered, 1);
        assert_eq!(
            runtime.tracker().score(&session, &"c1".into()).unwrap(),
            Some(300_000)
        );
        assert_eq!(runtime.completer().recover_untracked().unwrap(), 0);
    }

    #[test]
    fn turn_based_commands_complete_once_their_turn_arrives() {
        let clock = Arc::new(ManualClock::new(0));
        let runtime = SchedulerRuntime::in_memory(SchedulerConfig::builtin(), clock);
        runtime
            .sessions()
            .insert(Session::turn_based("T1", 60))
            .unwrap();
        let session = SessionId::from("T1");
        runtime
            .submit(Command::new("c1", "T1", "A1", CommandType::Build, json!({})))
            .unwrap();

        assert_eq!(runtime.completer().tick().unwrap().completed, 0);

        // Advancing the turn leaves the busy actor alone.
        runtime.turn_scheduler().advance_turn(&session).unwrap();
        let report = runtime.completer().tick().unwrap();
        assert_eq!(report.completed, 1);
    }

    #[test]
    fn failed_completion_write_keeps_the_command_tracked() {
        let w = wired(&[Session::realtime("S1")]);
        let session = SessionId::from("S1");
        w.runtime.submit(train("c1")).unwrap();
        w.runtime.submit(train("c2")).unwrap();
        w.commands.failing_updates.store(1, Ordering::SeqCst);
        w.clock.set(300_000);

        assert!(w.runtime.completer().tick().is_err());
        assert_eq!(status(&w.runtime, "c1"), CommandStatus::Executing);
        assert_eq!(
            w.runtime.tracker().entries(&session).unwrap(),
            vec![(CommandId::from("c1"), 300_000)]
        );

        let report = w.runtime.completer().tick().unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(status(&w.runtime, "c2"), CommandStatus::Executing);
    }

    #[test]
    fn failed_pointer_clear_does_not_block_the_actor() {
        let w = wired(&[Session::realtime("S1")]);
        let session = SessionId::from("S1");
        let actor = ActorId::from("A1");
        w.runtime.submit(train("c1")).unwrap();
        w.runtime.submit(train("c2")).unwrap();
        w.store.fail_next_op("delete_if_equals", 1);
        w.clock.set(300_000);

        assert!(w.runtime.completer().tick().is_err());
        w.clock.set(300_001);
        w.runtime.completer().tick().unwrap();

        assert_eq!(status(&w.runtime, "c1"), CommandStatus::Completed);
        assert_eq!(status(&w.runtime, "c2"), CommandStatus::Executing);
        assert_eq!(
            w.runtime.queues().current(&session, &actor).unwrap(),
            Some(CommandId::from("c2"))
        );
        assert_eq!(w.runtime.metrics().snapshot().commands_completed, 1);
    }

    #[test]
    fn corrupt_session_does_not_hold_up_the_others() {
        let w = wired(&[Session::turn_based("A0", 60), Session::realtime("S1")]);
        w.store.set("turn:A0", "garbage").unwrap();
        w.runtime
            .submit(Command::new("c1", "S1", "A1", CommandType::Scout, json!({})))
            .unwrap();
        w.clock.set(90_000);

        let err = w.runtime.completer().tick().expect_err("A0 is corrupt");

        assert!(matches!(err, SchedulerError::Store(_)));
        assert_eq!(status(&w.runtime, "c1"), CommandStatus::Completed);
        assert_eq!(w.runtime.metrics().snapshot().session_errors, 1);
    }

    #[test]
    fn deferred_start_left_in_the_tracker_returns_to_the_queue() {
        let w = wired(&[Session::realtime("S1")]);
        let session = SessionId::from("S1");
        let actor = ActorId::from("A1");
        w.runtime.submit(train("c1")).unwrap();
        // A rollback that reset the status but could not reach the store.
        w.runtime
            .commands()
            .update_status(&"c1".into(), StatusUpdate::pending(0))
            .unwrap();
        w.clock.set(300_000);

        let report = w.runtime.completer().tick().unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.started, 1);
        assert_eq!(status(&w.runtime, "c1"), CommandStatus::Executing);
        assert_eq!(
            w.runtime.tracker().entries(&session).unwrap(),
            vec![(CommandId::from("c1"), 600_000)]
        );
        assert_eq!(
            w.runtime.queues().current(&session, &actor).unwrap(),
            Some(CommandId::from("c1"))
        );
    }

    #[test]
    fn failed_lookup_of_a_queued_command_keeps_its_status() {
        let w = wired(&[Session::realtime("S1")]);
        let session = SessionId::from("S1");
        let actor = ActorId::from("A1");
        w.runtime.submit(train("c1")).unwrap();
        w.runtime.submit(train("c2")).unwrap();
        w.runtime
            .commands()
            .update_status(&"c2".into(), StatusUpdate::cancelled(0))
            .unwrap();
        *w.commands.failing_lookup.lock() = Some("c2".into());
        w.clock.set(300_000);

        let err = w.runtime.completer().tick().unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(status(&w.runtime, "c1"), CommandStatus::Completed);
        assert_eq!(status(&w.runtime, "c2"), CommandStatus::Cancelled);
        assert!(w.runtime.queues().pending(&session, &actor).unwrap().is_empty());
        assert_eq!(w.runtime.queues().current(&session, &actor).unwrap(), None);
        assert_eq!(w.runtime.metrics().snapshot().commands_requeued, 1);
    }
}
