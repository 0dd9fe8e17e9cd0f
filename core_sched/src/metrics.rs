use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by every loop of one scheduler process.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    completer_ticks: AtomicU64,
    turn_ticks: AtomicU64,
    worker_ticks: AtomicU64,
    tick_errors: AtomicU64,
    commands_started: AtomicU64,
    commands_completed: AtomicU64,
    commands_failed: AtomicU64,
    commands_skipped: AtomicU64,
    commands_requeued: AtomicU64,
    session_errors: AtomicU64,
    turns_advanced: AtomicU64,
    messages_published: AtomicU64,
    messages_acked: AtomicU64,
    handler_failures: AtomicU64,
    dead_lettered: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub completer_ticks: u64,
    pub turn_ticks: u64,
    pub worker_ticks: u64,
    pub tick_errors: u64,
    pub commands_started: u64,
    pub commands_completed: u64,
    pub commands_failed: u64,
    pub commands_skipped: u64,
    pub commands_requeued: u64,
    pub session_errors: u64,
    pub turns_advanced: u64,
    pub messages_published: u64,
    pub messages_acked: u64,
    pub handler_failures: u64,
    pub dead_lettered: u64,
}

/// Loop that produced a tick, for the per-loop tick counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Completer,
    TurnScheduler,
    Worker,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl SchedulerMetrics {
    pub fn record_tick(&self, kind: LoopKind) {
        match kind {
            LoopKind::Completer => bump(&self.completer_ticks, 1),
            LoopKind::TurnScheduler => bump(&self.turn_ticks, 1),
            LoopKind::Worker => bump(&self.worker_ticks, 1),
        }
    }

    pub fn record_tick_error(&self) {
        bump(&self.tick_errors, 1);
    }

    pub fn record_started(&self) {
        bump(&self.commands_started, 1);
    }

    pub fn record_completed(&self) {
        bump(&self.commands_completed, 1);
    }

    pub fn record_failed(&self) {
        bump(&self.commands_failed, 1);
    }

    pub fn record_skipped(&self) {
        bump(&self.commands_skipped, 1);
    }

    pub fn record_requeued(&self) {
        bump(&self.commands_requeued, 1);
    }

    pub fn record_session_error(&self) {
        bump(&self.session_errors, 1);
    }

    pub fn record_turn_advanced(&self) {
        bump(&self.turns_advanced, 1);
    }

    pub fn record_published(&self) {
        bump(&self.messages_published, 1);
    }

    pub fn record_acked(&self, count: u64) {
        bump(&self.messages_acked, count);
    }

    pub fn record_handler_failure(&self) {
        bump(&self.handler_failures, 1);
    }

    pub fn record_dead_lettered(&self) {
        bump(&self.dead_lettered, 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            completer_ticks: load(&self.completer_ticks),
            turn_ticks: load(&self.turn_ticks),
            worker_ticks: load(&self.worker_ticks),
            tick_errors: load(&self.tick_errors),
            commands_started: load(&self.commands_started),
            commands_completed: load(&self.commands_completed),
            commands_failed: load(&self.commands_failed),
            commands_skipped: load(&self.commands_skipped),
            commands_requeued: load(&self.commands_requeued),
            session_errors: load(&self.session_errors),
            turns_advanced: load(&self.turns_advanced),
            messages_published: load(&self.messages_published),
            messages_acked: load(&self.messages_acked),
            handler_failures: load(&self.handler_failures),
            dead_lettered: load(&self.dead_lettered),
        }
    }
}
