//! Producer/consumer wrapper over the execution stream.
//!
//! Delivery is at-least-once. A handler failure leaves the message pending;
//! [`CommandQueue::claim_pending_messages`] hands idle pending messages to a
//! live consumer until they hit the delivery limit, after which they go to the
//! dead-letter sink and are acknowledged.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sched_schema::StreamEnvelope;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::StreamConfig;
use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::error::SchedulerError;
use crate::metrics::SchedulerMetrics;
use crate::store::{MessageId, StoreError, StreamEntry, StreamTransport};

/// Failure reported by a message handler.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome of one consume or claim pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub acked: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

pub struct CommandQueue {
    transport: Arc<dyn StreamTransport>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<SchedulerMetrics>,
    stream_key: String,
    batch_size: usize,
    block: Duration,
    max_deliveries: u32,
}

impl CommandQueue {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        dead_letters: Arc<dyn DeadLetterSink>,
        metrics: Arc<SchedulerMetrics>,
        config: &StreamConfig,
    ) -> Self {
        Self {
            transport,
            dead_letters,
            metrics,
            stream_key: config.stream_key.clone(),
            batch_size: config.batch_size.max(1),
            block: config.block(),
            max_deliveries: config.max_deliveries.max(1),
        }
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Appends the envelope to the execution stream. A transport error is
    /// retryable by the caller.
    pub fn publish(&self, envelope: &StreamEnvelope) -> Result<MessageId, SchedulerError> {
        let body = envelope.encode()?;
        let id = self.transport.append(&self.stream_key, &body)?;
        self.metrics.record_published();
        debug!(
            target: "warfront::stream",
            message_id = %id,
            command_id = %envelope.command_id,
            session_id = %envelope.session_id,
            "stream.published"
        );
        Ok(id)
    }

    pub fn ensure_group(&self, group: &str) -> Result<(), StoreError> {
        if self.transport.create_group(&self.stream_key, group)? {
            debug!(target: "warfront::stream", group, "stream.group_created");
        }
        Ok(())
    }

    /// One bounded read for `consumer` in `group`. Handled messages are
    /// acknowledged; failed ones stay pending for a later claim.
    pub fn consume<F>(
        &self,
        group: &str,
        consumer: &str,
        mut handler: F,
    ) -> Result<DeliveryReport, SchedulerError>
    where
        F: FnMut(&StreamEnvelope) -> Result<(), HandlerError>,
    {
        self.ensure_group(group)?;
        let entries = self.transport.read_group(
            &self.stream_key,
            group,
            consumer,
            self.batch_size,
            self.block,
        )?;
        let mut report = DeliveryReport {
            delivered: entries.len(),
            ..DeliveryReport::default()
        };
        for entry in entries {
            self.dispatch(group, consumer, entry, &mut handler, &mut report);
        }
        Ok(report)
    }

    /// Moves messages idle for at least `min_idle` to `consumer` and retries
    /// them. Messages already delivered `max_deliveries` times are
    /// dead-lettered and acknowledged instead of being retried again.
    pub fn claim_pending_messages<F>(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        mut handler: F,
    ) -> Result<DeliveryReport, SchedulerError>
    where
        F: FnMut(&StreamEnvelope) -> Result<(), HandlerError>,
    {
        self.ensure_group(group)?;
        let idle: Vec<_> = self
            .transport
            .pending(&self.stream_key, group)?
            .into_iter()
            .filter(|entry| entry.idle >= min_idle)
            .collect();
        if idle.is_empty() {
            return Ok(DeliveryReport::default());
        }

        let exhausted: HashSet<MessageId> = idle
            .iter()
            .filter(|entry| entry.delivery_count >= self.max_deliveries)
            .map(|entry| entry.id)
            .collect();
        let ids: Vec<MessageId> = idle.iter().map(|entry| entry.id).collect();
        let claimed = self
            .transport
            .claim(&self.stream_key, group, consumer, min_idle, &ids)?;

        let mut report = DeliveryReport::default();
        for entry in claimed {
            if exhausted.contains(&entry.id) {
                let previous = entry.delivery_count.saturating_sub(1);
                let reason = format!("delivery limit of {} reached", self.max_deliveries);
                if self.dead_letter(group, &entry, previous, &reason) {
                    report.dead_lettered += 1;
                    report.acked += self.ack(group, entry.id);
                }
                continue;
            }
            report.delivered += 1;
            self.dispatch(group, consumer, entry, &mut handler, &mut report);
        }
        Ok(report)
    }

    /// Messages delivered to `group` but not yet acknowledged.
    pub fn pending_count(&self, group: &str) -> Result<usize, StoreError> {
        Ok(self.transport.pending(&self.stream_key, group)?.len())
    }

    fn dispatch<F>(
        &self,
        group: &str,
        consumer: &str,
        entry: StreamEntry,
        handler: &mut F,
        report: &mut DeliveryReport,
    ) where
        F: FnMut(&StreamEnvelope) -> Result<(), HandlerError>,
    {
        let envelope = match StreamEnvelope::decode(&entry.body) {
            Ok(envelope) => envelope,
            Err(err) => {
                if self.dead_letter(group, &entry, entry.delivery_count, &err.to_string()) {
                    report.dead_lettered += 1;
                    report.acked += self.ack(group, entry.id);
                }
                return;
            }
        };

        match handler(&envelope) {
            Ok(()) => report.acked += self.ack(group, entry.id),
            Err(err) => {
                report.failed += 1;
                self.metrics.record_handler_failure();
                warn!(
                    target: "warfront::stream",
                    message_id = %entry.id,
                    command_id = %envelope.command_id,
                    consumer,
                    delivery = entry.delivery_count,
                    error = %err,
                    "stream.handler_failed"
                );
            }
        }
    }

    fn ack(&self, group: &str, id: MessageId) -> usize {
        match self.transport.ack(&self.stream_key, group, &[id]) {
            Ok(count) => {
                self.metrics.record_acked(count as u64);
                count
            }
            Err(err) => {
                warn!(
                    target: "warfront::stream",
                    message_id = %id,
                    error = %err,
                    "stream.ack_failed"
                );
                0
            }
        }
    }

    fn dead_letter(&self, group: &str, entry: &StreamEntry, deliveries: u32, reason: &str) -> bool {
        let letter = DeadLetter::new(
            entry.id,
            &self.stream_key,
            group,
            deliveries,
            reason,
            &entry.body,
        );
        match self.dead_letters.record(&letter) {
            Ok(()) => {
                self.metrics.record_dead_lettered();
                error!(
                    target: "warfront::stream",
                    message_id = %entry.id,
                    group,
                    deliveries,
                    reason,
                    "stream.dead_lettered"
                );
                true
            }
            Err(err) => {
                error!(
                    target: "warfront::stream",
                    message_id = %entry.id,
                    error = %err,
                    "stream.dead_letter_failed"
                );
                false
            }
        }
    }
}
