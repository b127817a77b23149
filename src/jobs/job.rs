//! `Job`/`JobRunner` (spec §4.10): a bounded, thread-backed work queue
//! decoupling the camera-callback fast path from slow I/O (image encoding,
//! disk writes).

use crate::error::{AcqError, AcqResult};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, warn};

/// Unit of deferred work created from one captured frame.
pub trait Job: Send + 'static {
    fn id(&self) -> String;
    fn run(&self) -> AcqResult<()>;
}

struct JobOutcome {
    id: String,
    result: AcqResult<()>,
}

/// Thread-backed worker with bounded input/output queues (spec §4.10).
/// `dispatch` never blocks; `output_queue` is drained by
/// `MultiPointWorker`'s periodic poll to detect failures.
pub struct JobRunner {
    input: Sender<Box<dyn Job>>,
    output: Receiver<JobOutcome>,
    dispatched: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    shutdown: Arc<AtomicBool>,
}

pub struct JobRunnerHandle {
    _thread: JoinHandle<()>,
}

impl JobRunner {
    pub fn start(queue_depth: usize) -> (Self, JobRunnerHandle) {
        let (input_tx, input_rx): (Sender<Box<dyn Job>>, Receiver<Box<dyn Job>>) =
            crossbeam_channel::bounded(queue_depth);
        let (output_tx, output_rx): (Sender<JobOutcome>, Receiver<JobOutcome>) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = shutdown.clone();

        let thread = std::thread::Builder::new()
            .name("job-runner".into())
            .spawn(move || {
                for job in input_rx.iter() {
                    if worker_shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let id = job.id();
                    let result = job.run();
                    if result.is_err() {
                        error!(job = %id, "job failed");
                    }
                    let _ = output_tx.send(JobOutcome { id, result });
                }
            })
            .expect("failed to spawn job runner thread");

        (
            Self {
                input: input_tx,
                output: output_rx,
                dispatched: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                shutdown,
            },
            JobRunnerHandle { _thread: thread },
        )
    }

    /// Non-blocking dispatch (spec §4.10). Returns `false` if the bounded
    /// input queue is full.
    pub fn dispatch(&self, job: Box<dyn Job>) -> bool {
        match self.input.try_send(job) {
            Ok(()) => {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("job runner input queue full; dispatch failed");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("job runner worker thread is gone; dispatch failed");
                false
            }
        }
    }

    /// Drains completed/failed outcomes accumulated since the last poll
    /// (spec §4.10 "output_queue() is drained periodically"). Returns the
    /// number of failures observed in this poll.
    pub fn poll_outcomes(&self) -> usize {
        let mut failures = 0;
        while let Ok(outcome) = self.output.try_recv() {
            match outcome.result {
                Ok(()) => {
                    self.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    failures += 1;
                    error!(job = %outcome.id, error = %err, "job failure observed in output queue");
                }
            }
        }
        failures
    }

    /// Blocks up to `timeout` for all dispatched jobs to complete (spec
    /// §4.9 "End of run ... drain job runners").
    pub fn drain(&self, timeout: Duration) -> AcqResult<()> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            self.poll_outcomes();
            if self.completed.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
                >= self.dispatched.load(Ordering::Relaxed)
            {
                return Ok(());
            }
            if std::time::Instant::now() >= deadline {
                return Err(AcqError::HardwareTimeout(timeout, "job runner drain".into()));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OkJob(&'static str);
    impl Job for OkJob {
        fn id(&self) -> String {
            self.0.to_string()
        }
        fn run(&self) -> AcqResult<()> {
            Ok(())
        }
    }

    struct FailJob;
    impl Job for FailJob {
        fn id(&self) -> String {
            "fail".into()
        }
        fn run(&self) -> AcqResult<()> {
            Err(AcqError::FilesystemError("disk full".into()))
        }
    }

    #[test]
    fn dispatch_and_drain_completes_jobs() {
        let (runner, _h) = JobRunner::start(8);
        assert!(runner.dispatch(Box::new(OkJob("a"))));
        assert!(runner.dispatch(Box::new(OkJob("b"))));
        runner.drain(Duration::from_secs(2)).unwrap();
        assert_eq!(runner.failed_count(), 0);
    }

    #[test]
    fn failed_job_is_counted() {
        let (runner, _h) = JobRunner::start(8);
        assert!(runner.dispatch(Box::new(FailJob)));
        runner.drain(Duration::from_secs(2)).unwrap();
        assert_eq!(runner.failed_count(), 1);
    }

    #[test]
    fn full_queue_rejects_dispatch() {
        let (runner, _h) = JobRunner::start(1);
        struct SlowJob;
        impl Job for SlowJob {
            fn id(&self) -> String {
                "slow".into()
            }
            fn run(&self) -> AcqResult<()> {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            }
        }
        assert!(runner.dispatch(Box::new(SlowJob)));
        std::thread::sleep(Duration::from_millis(10));
        assert!(runner.dispatch(Box::new(OkJob("queued"))));
        assert!(!runner.dispatch(Box::new(OkJob("rejected"))));
    }
}
