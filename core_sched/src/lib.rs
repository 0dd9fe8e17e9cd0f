//! Write-path command scheduler for Warfront sessions.
//!
//! Commands are queued per actor, started one at a time, tracked by a
//! due-score (epoch milliseconds for realtime sessions, a turn number for
//! turn-based ones) and completed by a polling [`CommandCompleter`]. Started
//! commands are published on a shared stream for downstream workers.

pub mod admin;
pub mod clock;
pub mod command_queue;
pub mod completer;
pub mod config;
pub mod dead_letter;
mod error;
pub mod execution_queue;
pub mod launcher;
pub mod metrics;
pub mod poller;
pub mod repository;
pub mod store;
pub mod tracker;
pub mod turn_counter;
pub mod turn_scheduler;
pub mod worker;

use std::io;
use std::sync::Arc;

use sched_schema::Command;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command_queue::{CommandQueue, DeliveryReport, HandlerError};
pub use completer::{CommandCompleter, CompletionReport};
pub use config::{load_scheduler_config_from_env, ConfigError, SchedulerConfig};
pub use error::SchedulerError;
pub use execution_queue::ExecutionQueues;
pub use launcher::{CommandLauncher, StartedCommand};
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use poller::{LoopSettings, PollHandle};
pub use repository::{
    CommandRepository, MemoryCommandRepository, MemorySessionRepository, SessionRepository,
};
pub use store::{KeyValueStore, MemoryStore, StoreError, StreamTransport};
pub use tracker::CompletionTracker;
pub use turn_counter::TurnCounter;
pub use turn_scheduler::TurnScheduler;
pub use worker::{CommandExecutor, ExecutionWorker, LoggingExecutor};

use dead_letter::StreamDeadLetterSink;

/// Every scheduler component wired against one store, one stream transport
/// and one pair of repositories.
pub struct SchedulerRuntime {
    config: SchedulerConfig,
    commands: Arc<dyn CommandRepository>,
    sessions: Arc<dyn SessionRepository>,
    metrics: Arc<SchedulerMetrics>,
    queues: ExecutionQueues,
    tracker: CompletionTracker,
    turns: TurnCounter,
    command_queue: Arc<CommandQueue>,
    launcher: Arc<CommandLauncher>,
    completer: Arc<CommandCompleter>,
    turn_scheduler: Arc<TurnScheduler>,
}

impl SchedulerRuntime {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn StreamTransport>,
        commands: Arc<dyn CommandRepository>,
        sessions: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::new(SchedulerMetrics::default());
        let queues = ExecutionQueues::new(Arc::clone(&store));
        let tracker = CompletionTracker::new(Arc::clone(&store));
        let turns = TurnCounter::new(store);

        let dead_letters = Arc::new(StreamDeadLetterSink::new(
            Arc::clone(&transport),
            config.stream.dead_letter_stream.clone(),
        ));
        let command_queue = Arc::new(CommandQueue::new(
            transport,
            dead_letters,
            Arc::clone(&metrics),
            &config.stream,
        ));
        let launcher = Arc::new(CommandLauncher::new(
            queues.clone(),
            tracker.clone(),
            turns.clone(),
            Arc::clone(&commands),
            Arc::clone(&command_queue),
            Arc::clone(&clock),
            config.durations.clone(),
            Arc::clone(&metrics),
        ));
        let completer = Arc::new(CommandCompleter::new(
            Arc::clone(&sessions),
            Arc::clone(&commands),
            queues.clone(),
            tracker.clone(),
            turns.clone(),
            Arc::clone(&launcher),
            Arc::clone(&clock),
            Arc::clone(&metrics),
        ));
        let turn_scheduler = Arc::new(TurnScheduler::new(
            Arc::clone(&sessions),
            tracker.clone(),
            turns.clone(),
            Arc::clone(&launcher),
            clock,
            Arc::clone(&metrics),
        ));

        Self {
            config,
            commands,
            sessions,
            metrics,
            queues,
            tracker,
            turns,
            command_queue,
            launcher,
            completer,
            turn_scheduler,
        }
    }

    /// Runtime over a fresh [`MemoryStore`] and in-memory repositories.
    pub fn in_memory(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(
            config,
            store.clone(),
            store,
            Arc::new(MemoryCommandRepository::new()),
            Arc::new(MemorySessionRepository::new()),
            clock,
        )
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn commands(&self) -> &Arc<dyn CommandRepository> {
        &self.commands
    }

    pub fn sessions(&self) -> &Arc<dyn SessionRepository> {
        &self.sessions
    }

    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.metrics
    }

    pub fn queues(&self) -> &ExecutionQueues {
        &self.queues
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    pub fn turn_counter(&self) -> &TurnCounter {
        &self.turns
    }

    pub fn command_queue(&self) -> &Arc<CommandQueue> {
        &self.command_queue
    }

    pub fn launcher(&self) -> &Arc<CommandLauncher> {
        &self.launcher
    }

    pub fn completer(&self) -> &Arc<CommandCompleter> {
        &self.completer
    }

    pub fn turn_scheduler(&self) -> &Arc<TurnScheduler> {
        &self.turn_scheduler
    }

    /// Queues `command` in its session and starts it if its actor is idle.
    pub fn submit(&self, command: Command) -> Result<Option<StartedCommand>, SchedulerError> {
        let session = self
            .sessions
            .find_by_id(&command.session_id)?
            .ok_or_else(|| SchedulerError::SessionNotFound(command.session_id.clone()))?;
        self.launcher.submit(&session, command)
    }

    pub fn worker(&self, executor: Arc<dyn CommandExecutor>) -> ExecutionWorker {
        ExecutionWorker::new(
            Arc::clone(&self.command_queue),
            executor,
            &self.config.stream,
            Arc::clone(&self.metrics),
        )
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings::new(self.config.poll_interval(), self.config.error_backoff())
    }

    /// Starts the completer, the turn scheduler and one execution worker.
    pub fn start_loops(&self, executor: Arc<dyn CommandExecutor>) -> io::Result<Vec<PollHandle>> {
        let settings = self.loop_settings();
        if let Err(err) = self.command_queue.ensure_group(&self.config.stream.group) {
            tracing::warn!(
                target: "warfront::runtime",
                group = %self.config.stream.group,
                error = %err,
                "stream.group_create_failed"
            );
        }
        let worker = Arc::new(self.worker(executor));
        Ok(vec![
            self.completer.start(settings)?,
            self.turn_scheduler.start(settings)?,
            worker.start(settings)?,
        ])
    }
}
