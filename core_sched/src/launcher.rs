//! The single path by which a queued command starts executing.
//!
//! The completer, the turn scheduler and command submission all go through
//! [`CommandLauncher::start_next`], so a started command is always marked
//! EXECUTING, tracked with a due-score and published, in that order. A start
//! that hits an outage puts the command back at the head of its queue; one
//! that fails for any other reason marks it FAILED.

use std::sync::Arc;

use sched_schema::{ActorId, Command, CommandId, CommandStatus, Session, StreamEnvelope};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::command_queue::CommandQueue;
use crate::config::DurationTable;
use crate::error::SchedulerError;
use crate::execution_queue::ExecutionQueues;
use crate::metrics::SchedulerMetrics;
use crate::repository::{CommandRepository, StatusUpdate};
use crate::store::Score;
use crate::tracker::CompletionTracker;
use crate::turn_counter::TurnCounter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedCommand {
    pub command_id: CommandId,
    pub due_score: Score,
}

pub struct CommandLauncher {
    queues: ExecutionQueues,
    tracker: CompletionTracker,
    turns: TurnCounter,
    commands: Arc<dyn CommandRepository>,
    stream: Arc<CommandQueue>,
    clock: Arc<dyn Clock>,
    durations: DurationTable,
    metrics: Arc<SchedulerMetrics>,
}

impl CommandLauncher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queues: ExecutionQueues,
        tracker: CompletionTracker,
        turns: TurnCounter,
        commands: Arc<dyn CommandRepository>,
        stream: Arc<CommandQueue>,
        clock: Arc<dyn Clock>,
        durations: DurationTable,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            queues,
            tracker,
            turns,
            commands,
            stream,
            clock,
            durations,
            metrics,
        }
    }

    /// Records a new command, queues it behind the actor's earlier commands
    /// and starts it right away if the actor is idle.
    pub fn submit(
        &self,
        session: &Session,
        mut command: Command,
    ) -> Result<Option<StartedCommand>, SchedulerError> {
        command.status = CommandStatus::Pending;
        let actor = command.actor_id.clone();
        let id = command.id.clone();
        self.commands.insert(command)?;
        let depth = self.queues.enqueue(&session.id, &actor, &id)?;
        debug!(
            target: "warfront::launcher",
            session_id = %session.id,
            actor_id = %actor,
            command_id = %id,
            depth,
            "command.enqueued"
        );
        self.start_next(session, &actor)
    }

    /// Completion score for a command of `command_type` starting now.
    pub fn due_score(
        &self,
        session: &Session,
        command: &Command,
        now_ms: i64,
    ) -> Result<Score, SchedulerError> {
        if session.is_turn_based() {
            let turn = self.turns.current(session)?;
            Ok(turn as Score + 1)
        } else {
            let secs = self.durations.duration_secs(command.command_type);
            Ok(now_ms + secs as Score * 1_000)
        }
    }

    /// Starts the actor's next queued command. Returns `None` when the queue
    /// is empty or the actor already has a command in flight.
    ///
    /// Queued commands that vanished from the command store or were cancelled
    /// while waiting are dropped and the following one is tried. A pointer
    /// left behind by a finished command is released first.
    pub fn start_next(
        &self,
        session: &Session,
        actor: &ActorId,
    ) -> Result<Option<StartedCommand>, SchedulerError> {
        loop {
            let Some(command_id) = self.queues.dequeue_next(&session.id, actor)? else {
                if self.release_stale_pointer(session, actor)? {
                    continue;
                }
                return Ok(None);
            };

            let command = match self.commands.find_by_id(&command_id) {
                Ok(Some(command)) => command,
                Ok(None) => {
                    warn!(
                        target: "warfront::launcher",
                        session_id = %session.id,
                        actor_id = %actor,
                        command_id = %command_id,
                        "command.start_skipped=missing"
                    );
                    self.metrics.record_skipped();
                    self.queues.clear_current(&session.id, actor, &command_id)?;
                    continue;
                }
                Err(err) => {
                    // Status unknown, so it is left as stored.
                    let err = SchedulerError::from(err);
                    if err.is_retryable() {
                        self.metrics.record_requeued();
                        self.return_to_queue(session, actor, &command_id, &err);
                    } else {
                        self.clear_after_abort(session, actor, &command_id);
                    }
                    return Err(err);
                }
            };

            // EXECUTING here means an earlier rollback lost its status write.
            if !matches!(
                command.status,
                CommandStatus::Pending | CommandStatus::Scheduled | CommandStatus::Executing
            ) {
                info!(
                    target: "warfront::launcher",
                    session_id = %session.id,
                    actor_id = %actor,
                    command_id = %command_id,
                    status = ?command.status,
                    "command.start_skipped=not_pending"
                );
                self.metrics.record_skipped();
                self.queues.clear_current(&session.id, actor, &command_id)?;
                continue;
            }

            return match self.launch(session, &command) {
                Ok(due_score) => {
                    self.metrics.record_started();
                    info!(
                        target: "warfront::launcher",
                        session_id = %session.id,
                        actor_id = %actor,
                        command_id = %command_id,
                        command_type = %command.command_type,
                        due_score,
                        "command.started"
                    );
                    Ok(Some(StartedCommand {
                        command_id,
                        due_score,
                    }))
                }
                Err(err) => {
                    self.abort_start(session, actor, &command_id, &err);
                    Err(err)
                }
            };
        }
    }

    /// Starts every actor of `session` that has queued work and nothing in
    /// flight. Per-actor failures are logged and do not stop the sweep.
    pub fn start_idle_actors(&self, session: &Session) -> Result<usize, SchedulerError> {
        let mut started = 0;
        for actor in self.queues.pending_actors(&session.id)? {
            match self.start_next(session, &actor) {
                Ok(Some(_)) => started += 1,
                Ok(None) => {}
                Err(err) => warn!(
                    target: "warfront::launcher",
                    session_id = %session.id,
                    actor_id = %actor,
                    error = %err,
                    "command.start_failed"
                ),
            }
        }
        Ok(started)
    }

    fn launch(&self, session: &Session, command: &Command) -> Result<Score, SchedulerError> {
        let now = self.clock.now_ms();
        let due_score = self.due_score(session, command, now)?;
        self.commands
            .update_status(&command.id, StatusUpdate::executing(now, due_score))?;
        self.tracker.track(&session.id, &command.id, due_score)?;
        self.stream.publish(&StreamEnvelope::for_command(command))?;
        Ok(due_score)
    }

    /// Frees an actor whose pointer still names a command that already
    /// finished or no longer exists.
    fn release_stale_pointer(
        &self,
        session: &Session,
        actor: &ActorId,
    ) -> Result<bool, SchedulerError> {
        let Some(current) = self.queues.current(&session.id, actor)? else {
            return Ok(false);
        };
        let stale = match self.commands.find_by_id(&current)? {
            Some(command) => command.status.is_terminal(),
            None => true,
        };
        if !stale || !self.queues.clear_current(&session.id, actor, &current)? {
            return Ok(false);
        }
        warn!(
            target: "warfront::launcher",
            session_id = %session.id,
            actor_id = %actor,
            command_id = %current,
            "command.stale_pointer_released"
        );
        Ok(true)
    }

    /// Best-effort rollback of a half-started command so the actor is not
    /// left pointing at it.
    fn abort_start(
        &self,
        session: &Session,
        actor: &ActorId,
        command_id: &CommandId,
        err: &SchedulerError,
    ) {
        if let Err(untrack_err) = self.tracker.untrack(&session.id, command_id) {
            warn!(target: "warfront::launcher", command_id = %command_id, error = %untrack_err, "command.abort_untrack_failed");
        }
        if err.is_retryable() {
            self.defer_start(session, actor, command_id, err);
        } else {
            self.fail_start(session, actor, command_id, err);
        }
    }

    /// Outage: the command goes back to PENDING at the head of its queue so
    /// the next sweep starts it again.
    fn defer_start(
        &self,
        session: &Session,
        actor: &ActorId,
        command_id: &CommandId,
        err: &SchedulerError,
    ) {
        self.metrics.record_requeued();
        warn!(
            target: "warfront::launcher",
            session_id = %session.id,
            actor_id = %actor,
            command_id = %command_id,
            error = %err,
            "command.start_deferred"
        );
        if let Err(status_err) = self
            .commands
            .update_status(command_id, StatusUpdate::pending(self.clock.now_ms()))
        {
            warn!(target: "warfront::launcher", command_id = %command_id, error = %status_err, "command.abort_status_failed");
        }
        self.return_to_queue(session, actor, command_id, err);
    }

    fn return_to_queue(
        &self,
        session: &Session,
        actor: &ActorId,
        command_id: &CommandId,
        err: &SchedulerError,
    ) {
        match self.queues.requeue_front(&session.id, actor, command_id) {
            Ok(_) => debug!(
                target: "warfront::launcher",
                session_id = %session.id,
                actor_id = %actor,
                command_id = %command_id,
                cause = %err,
                "command.requeued"
            ),
            Err(queue_err) => warn!(target: "warfront::launcher", command_id = %command_id, error = %queue_err, "command.abort_requeue_failed"),
        }
    }

    fn clear_after_abort(&self, session: &Session, actor: &ActorId, command_id: &CommandId) {
        if let Err(clear_err) = self.queues.clear_current(&session.id, actor, command_id) {
            warn!(target: "warfront::launcher", command_id = %command_id, error = %clear_err, "command.abort_clear_failed");
        }
    }

    fn fail_start(
        &self,
        session: &Session,
        actor: &ActorId,
        command_id: &CommandId,
        err: &SchedulerError,
    ) {
        self.metrics.record_failed();
        warn!(
            target: "warfront::launcher",
            session_id = %session.id,
            actor_id = %actor,
            command_id = %command_id,
            error = %err,
            "command.start_aborted"
        );
        if let Err(status_err) = self.commands.update_status(
            command_id,
            StatusUpdate::failed(self.clock.now_ms(), err.to_string()),
        ) {
            warn!(target: "warfront::launcher", command_id = %command_id, error = %status_err, "command.abort_status_failed");
        }
        self.clear_after_abort(session, actor, command_id);
    }
}
