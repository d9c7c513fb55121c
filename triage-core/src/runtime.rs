use crate::dashboard::{Dashboard, RefreshOutcome};
use crate::error::TriageError;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Receives the result of every poll cycle.
pub trait CycleSink: Send + Sync + 'static {
    fn cycle_finished(&self, outcome: &Result<RefreshOutcome, TriageError>);
}

pub struct LogSink;

impl CycleSink for LogSink {
    fn cycle_finished(&self, outcome: &Result<RefreshOutcome, TriageError>) {
        match outcome {
            Ok(RefreshOutcome::Published { alerts, notices }) => {
                tracing::debug!(alerts, notices = notices.len(), "snapshot published");
            }
            Ok(RefreshOutcome::Skipped) => tracing::debug!("tick skipped, refresh in flight"),
            Err(err) => tracing::warn!(error = %err, "poll cycle failed, retrying next tick"),
        }
    }
}

enum Signal {
    Trigger,
    Stop,
}

/// Handle to a running [`PeriodicTask`]. Stopping is idempotent and also
/// happens when the handle is dropped.
pub struct StopHandle {
    tx: Mutex<Option<Sender<Signal>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StopHandle {
    /// Requests an immediate run. Returns false once stopped.
    pub fn trigger(&self) -> bool {
        let guard = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        guard
            .as_ref()
            .is_some_and(|tx| tx.send(Signal::Trigger).is_ok())
    }

    pub fn is_running(&self) -> bool {
        self.tx.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Blocks until the worker has finished its current run.
    pub fn stop(&self) {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(tx) = tx {
            let _ = tx.send(Signal::Stop);
        }
        let worker = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(worker) = worker {
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs a job once immediately, then every `interval` and on every trigger.
pub struct PeriodicTask;

impl PeriodicTask {
    pub fn spawn(
        name: &str,
        interval: Duration,
        mut job: impl FnMut() + Send + 'static,
    ) -> Result<StopHandle, TriageError> {
        let (tx, rx) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                job();
                loop {
                    match rx.recv_timeout(interval) {
                        Ok(Signal::Trigger) | Err(RecvTimeoutError::Timeout) => job(),
                        Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|e| TriageError::Fetch(format!("could not start {name}: {e}")))?;

        Ok(StopHandle {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }
}

/// Polls the dashboard on a fixed interval and reports each cycle to `sink`.
pub fn start_poller(
    dashboard: Arc<Dashboard>,
    interval: Duration,
    sink: impl CycleSink,
) -> Result<StopHandle, TriageError> {
    tracing::info!(interval_secs = interval.as_secs(), "starting alert poller");
    PeriodicTask::spawn("alert-poller", interval, move || {
        let outcome = dashboard.refresh();
        sink.cycle_finished(&outcome);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::ConsolidationConfig;
    use crate::feeds::BufferedFeed;
    use crate::metadata_store::InMemoryMetadataStore;
    use crate::pipeline::CycleOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[derive(Default)]
    struct CaptureSink {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl CycleSink for CaptureSink {
        fn cycle_finished(&self, outcome: &Result<RefreshOutcome, TriageError>) {
            if let Ok(mut guard) = self.seen.lock() {
                guard.push(match outcome {
                    Ok(RefreshOutcome::Published { .. }) => "published".into(),
                    Ok(RefreshOutcome::Skipped) => "skipped".into(),
                    Err(_) => "failed".into(),
                });
            }
        }
    }

    #[test]
    fn runs_immediately_and_on_trigger() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = PeriodicTask::spawn("test-task", Duration::from_secs(3600), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("spawn");

        assert!(wait_for(Duration::from_secs(2), || runs.load(Ordering::SeqCst) == 1));
        assert!(handle.trigger());
        assert!(wait_for(Duration::from_secs(2), || runs.load(Ordering::SeqCst) == 2));
        handle.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let handle = PeriodicTask::spawn("test-stop", Duration::from_millis(10), || {}).expect("spawn");
        assert!(handle.is_running());
        handle.stop();
        handle.stop();
        assert!(!handle.is_running());
        assert!(!handle.trigger());
    }

    #[test]
    fn no_runs_after_stop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = PeriodicTask::spawn("test-after-stop", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("spawn");
        assert!(wait_for(Duration::from_secs(2), || runs.load(Ordering::SeqCst) >= 2));
        drop(handle);

        let after = runs.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), after);
    }

    #[test]
    fn poller_reports_cycles_to_sink() {
        let board = Arc::new(Dashboard::new(
            Arc::new(BufferedFeed::default()),
            Arc::new(InMemoryMetadataStore::new()),
            CycleOptions::default(),
            ConsolidationConfig::default(),
        ));
        let sink = CaptureSink::default();
        let seen = sink.seen.clone();
        let handle = start_poller(board, Duration::from_secs(3600), sink).expect("start");

        assert!(wait_for(Duration::from_secs(2), || {
            seen.lock().expect("lock").contains(&"published".to_string())
        }));
        handle.stop();
    }
}
