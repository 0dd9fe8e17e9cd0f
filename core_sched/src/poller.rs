//! Thread-per-loop runner shared by the completer, the turn scheduler and the
//! execution worker.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{error, info};

use crate::error::SchedulerError;
use crate::metrics::{LoopKind, SchedulerMetrics};

/// Cadence of one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub interval: Duration,
    pub error_backoff: Duration,
}

impl LoopSettings {
    pub fn new(interval: Duration, error_backoff: Duration) -> Self {
        Self {
            interval,
            error_backoff,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(5))
    }
}

/// Control handle of a running poll loop.
pub struct PollHandle {
    name: &'static str,
    running: Arc<AtomicBool>,
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flips the running flag and wakes the loop if it is sleeping. A tick in
    /// progress is not waited for.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(target: "warfront::poller", name = self.name, "loop.stop_requested");
        }
        let _ = self.stop_tx.try_send(());
    }

    /// Stops the loop and waits for its thread to exit.
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(target: "warfront::poller", name = self.name, "loop.panicked");
            }
        }
    }
}

/// Runs `tick` on its own thread every `settings.interval`, or after
/// `settings.error_backoff` when the previous tick failed. Errors never end
/// the loop.
pub fn spawn_poll_loop<F>(
    name: &'static str,
    kind: LoopKind,
    settings: LoopSettings,
    metrics: Arc<SchedulerMetrics>,
    mut tick: F,
) -> io::Result<PollHandle>
where
    F: FnMut() -> Result<(), SchedulerError> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let loop_running = Arc::clone(&running);

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            info!(target: "warfront::poller", name, "loop.started");
            while loop_running.load(Ordering::SeqCst) {
                metrics.record_tick(kind);
                let delay = match tick() {
                    Ok(()) => settings.interval,
                    Err(err) => {
                        metrics.record_tick_error();
                        error!(
                            target: "warfront::poller",
                            name,
                            error = %err,
                            backoff_ms = settings.error_backoff.as_millis() as u64,
                            "loop.tick_failed"
                        );
                        settings.error_backoff
                    }
                };
                match stop_rx.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!(target: "warfront::poller", name, "loop.stopped");
        })?;

    Ok(PollHandle {
        name,
        running,
        stop_tx,
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        check()
    }

    #[test]
    fn failing_tick_backs_off_and_loop_keeps_running() {
        let metrics = Arc::new(SchedulerMetrics::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let loop_calls = Arc::clone(&calls);
        let handle = spawn_poll_loop(
            "test-loop",
            LoopKind::Completer,
            LoopSettings::new(Duration::from_millis(5), Duration::from_millis(20)),
            Arc::clone(&metrics),
            move || {
                let call = loop_calls.fetch_add(1, Ordering::SeqCst);
                if call == 0 {
                    Err(SchedulerError::Store(StoreError::Unavailable("down".into())))
                } else {
                    Ok(())
                }
            },
        )
        .expect("spawn");

        assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 3));
        handle.join();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tick_errors, 1);
        assert!(snapshot.completer_ticks >= 3);
    }

    #[test]
    fn stop_wakes_a_sleeping_loop() {
        let metrics = Arc::new(SchedulerMetrics::default());
        let handle = spawn_poll_loop(
            "sleepy-loop",
            LoopKind::Worker,
            LoopSettings::new(Duration::from_secs(3600), Duration::from_secs(3600)),
            metrics,
            || Ok(()),
        )
        .expect("spawn");
        assert!(handle.is_running());
        let started = Instant::now();
        handle.join();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
