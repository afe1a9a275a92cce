//! Worker thread lifecycle
//!
//! Each submission runs on its own OS thread. The async side only holds a
//! [`Worker`]: the oneshot carrying the outcome, the shared output buffers,
//! and a guard that cancels the thread if the worker is dropped first.

use std::thread;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::interp::{CancelToken, Interpreter, Limits, OutputBuffer, Outcome};
use crate::lang::Program;
use crate::runner::ExecuteError;

/// Stack size of worker threads.
const WORKER_STACK_SIZE: usize = 256 * 1024 * 1024;
/// Stack kept free below the interpreter's budget for builtins, formatting
/// and unwinding.
const WORKER_STACK_RESERVE: usize = 32 * 1024 * 1024;

/// Everything a worker needs to run one submission
#[derive(Debug)]
pub(crate) struct WorkerSpec {
    pub program: Program,
    pub source: String,
    pub limits: Limits,
    pub output_limit: usize,
    pub modules: Vec<&'static str>,
}

/// How waiting on a worker ended
#[derive(Debug)]
pub(crate) enum Completion {
    /// The worker reported back within the budget.
    Finished(Outcome),
    /// The budget ran out; the worker has been told to stop.
    TimedOut,
    /// The worker thread died without reporting (a panic).
    Lost,
}

/// A running submission
///
/// Dropping a `Worker` before it finishes trips its cancellation token, so an
/// abandoned `execute` future never leaves a thread spinning.
#[derive(Debug)]
pub(crate) struct Worker {
    receiver: oneshot::Receiver<Outcome>,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    guard: CancelGuard,
}

impl Worker {
    /// Spawn a worker thread running `spec`
    #[instrument(skip(spec), fields(modules = ?spec.modules))]
    pub(crate) fn spawn(spec: WorkerSpec) -> Result<Self, ExecuteError> {
        let stdout = OutputBuffer::new(spec.output_limit);
        // The traceback must always fit, so stderr is not capped by the
        // stdout budget.
        let stderr = OutputBuffer::new(usize::MAX);
        let cancel = CancelToken::new();
        let (sender, receiver) = oneshot::channel();

        let thread_stdout = stdout.clone();
        let thread_stderr = stderr.clone();
        let thread_cancel = cancel.clone();
        thread::Builder::new()
            .name("mentorbox-worker".into())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                let WorkerSpec {
                    program,
                    source,
                    limits,
                    modules,
                    ..
                } = spec;
                let mut interpreter =
                    Interpreter::new(thread_stdout, thread_stderr, thread_cancel, limits, modules)
                        .with_stack_budget(WORKER_STACK_SIZE - WORKER_STACK_RESERVE);
                let outcome = interpreter.run(&program, &source);
                drop(interpreter);
                // The receiver is gone when the caller gave up; nothing to do.
                let _ = sender.send(outcome);
            })
            .map_err(ExecuteError::Spawn)?;

        debug!("worker spawned");
        Ok(Self {
            receiver,
            stdout,
            stderr,
            guard: CancelGuard::new(cancel),
        })
    }

    /// Wait up to `budget` for the outcome. On timeout the worker is
    /// cancelled and given `grace` to acknowledge before being detached.
    pub(crate) async fn wait(&mut self, budget: Duration, grace: Duration) -> Completion {
        match timeout(budget, &mut self.receiver).await {
            Ok(Ok(outcome)) => {
                self.guard.disarm();
                Completion::Finished(outcome)
            }
            Ok(Err(_)) => {
                self.guard.disarm();
                Completion::Lost
            }
            Err(_) => {
                self.guard.cancel();
                match timeout(grace, &mut self.receiver).await {
                    Ok(_) => debug!("worker acknowledged cancellation"),
                    Err(_) => warn!(
                        grace_ms = grace.as_millis() as u64,
                        "worker did not stop within the grace period; detaching"
                    ),
                }
                Completion::TimedOut
            }
        }
    }

    pub(crate) fn stdout(&self) -> String {
        self.stdout.contents()
    }

    pub(crate) fn stderr(&self) -> String {
        self.stderr.contents()
    }
}

/// Trips the cancellation token on drop unless disarmed.
#[derive(Debug)]
struct CancelGuard {
    token: CancelToken,
    armed: bool,
}

impl CancelGuard {
    fn new(token: CancelToken) -> Self {
        Self { token, armed: true }
    }

    fn cancel(&mut self) {
        self.token.cancel();
        self.armed = false;
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("worker dropped while running; cancelling");
            self.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(source: &str) -> WorkerSpec {
        WorkerSpec {
            program: crate::lang::parse(source).unwrap(),
            source: source.to_string(),
            limits: Limits {
                max_recursion_depth: 100,
                max_collection_len: 10_000,
            },
            output_limit: 1024,
            modules: Vec::new(),
        }
    }

    #[tokio::test]
    async fn finished_worker_reports_outcome() {
        let mut worker = Worker::spawn(spec("print('hi')\n1 + 1")).unwrap();
        let completion = worker
            .wait(Duration::from_secs(10), Duration::from_millis(100))
            .await;
        match completion {
            Completion::Finished(Outcome::Completed { return_value }) => {
                assert_eq!(return_value.as_deref(), Some("2"));
            }
            other => panic!("unexpected completion: {other:?}"),
        }
        assert_eq!(worker.stdout(), "hi\n");
    }

    #[tokio::test]
    async fn runaway_worker_times_out_and_stops() {
        let mut worker = Worker::spawn(spec("print('start')\nwhile True:\n    pass\n")).unwrap();
        let completion = worker
            .wait(Duration::from_millis(100), Duration::from_secs(5))
            .await;
        assert!(matches!(completion, Completion::TimedOut));
        assert_eq!(worker.stdout(), "start\n");
    }

    #[test]
    fn dropping_an_armed_guard_cancels() {
        let token = CancelToken::new();
        drop(CancelGuard::new(token.clone()));
        assert!(token.is_cancelled());

        let token = CancelToken::new();
        let mut guard = CancelGuard::new(token.clone());
        guard.disarm();
        drop(guard);
        assert!(!token.is_cancelled());
    }
}
