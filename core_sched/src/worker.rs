//! Downstream consumer of the execution stream.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use sched_schema::StreamEnvelope;
use tracing::{debug, info};

use crate::command_queue::{CommandQueue, DeliveryReport, HandlerError};
use crate::config::StreamConfig;
use crate::error::SchedulerError;
use crate::metrics::{LoopKind, SchedulerMetrics};
use crate::poller::{spawn_poll_loop, LoopSettings, PollHandle};

/// Applies a started command to the game world.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, envelope: &StreamEnvelope) -> Result<(), HandlerError>;
}

/// Executor that only records what it was handed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExecutor;

impl CommandExecutor for LoggingExecutor {
    fn execute(&self, envelope: &StreamEnvelope) -> Result<(), HandlerError> {
        info!(
            target: "warfront::worker",
            session_id = %envelope.session_id,
            actor_id = %envelope.actor_id,
            command_id = %envelope.command_id,
            command_type = %envelope.command_type,
            "command.executed=logged"
        );
        Ok(())
    }
}

pub struct ExecutionWorker {
    queue: Arc<CommandQueue>,
    executor: Arc<dyn CommandExecutor>,
    group: String,
    consumer: String,
    claim_min_idle: Duration,
    metrics: Arc<SchedulerMetrics>,
}

impl ExecutionWorker {
    pub fn new(
        queue: Arc<CommandQueue>,
        executor: Arc<dyn CommandExecutor>,
        config: &StreamConfig,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            queue,
            executor,
            group: config.group.clone(),
            consumer: config.consumer.clone(),
            claim_min_idle: config.claim_min_idle(),
            metrics,
        }
    }

    pub fn start(self: &Arc<Self>, settings: LoopSettings) -> io::Result<PollHandle> {
        let worker = Arc::clone(self);
        spawn_poll_loop(
            "execution-worker",
            LoopKind::Worker,
            settings,
            Arc::clone(&self.metrics),
            move || worker.tick().map(|_| ()),
        )
    }

    /// One read of new messages followed by one retry pass over idle pending
    /// ones.
    pub fn tick(&self) -> Result<DeliveryReport, SchedulerError> {
        let executor = &self.executor;
        let fresh = self
            .queue
            .consume(&self.group, &self.consumer, |envelope| executor.execute(envelope))?;
        let retried = self.queue.claim_pending_messages(
            &self.group,
            &self.consumer,
            self.claim_min_idle,
            |envelope| executor.execute(envelope),
        )?;

        let report = DeliveryReport {
            delivered: fresh.delivered + retried.delivered,
            acked: fresh.acked + retried.acked,
            failed: fresh.failed + retried.failed,
            dead_lettered: fresh.dead_lettered + retried.dead_lettered,
        };
        if report.delivered > 0 || report.dead_lettered > 0 {
            debug!(
                target: "warfront::worker",
                consumer = %self.consumer,
                delivered = report.delivered,
                acked = report.acked,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                "worker.tick"
            );
        }
        Ok(report)
    }
}
