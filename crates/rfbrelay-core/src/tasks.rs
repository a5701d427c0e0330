//! Structured task groups for one session.
//!
//! Tasks run on scoped threads, so a session cannot return before every task
//! it started has been joined. Each task trips the session's [`DoneSignal`]
//! when it exits, whatever the outcome, and never before.
//! Task threads run inside the span that was current when they were spawned.

use std::io;
use std::thread::{self, Scope, ScopedJoinHandle};

use crate::cancel::DoneSignal;
use crate::error::{RelayError, Result};

/// Terminal result of one task.
#[derive(Debug)]
pub(crate) struct TaskOutcome {
    pub task: &'static str,
    pub result: Result<()>,
}

pub(crate) struct TaskGroup<'scope, 'env> {
    scope: &'scope Scope<'scope, 'env>,
    done: &'env DoneSignal,
    running: Vec<(&'static str, ScopedJoinHandle<'scope, Result<()>>)>,
    finished: Vec<TaskOutcome>,
}

impl<'scope, 'env> TaskGroup<'scope, 'env> {
    pub fn new(scope: &'scope Scope<'scope, 'env>, done: &'env DoneSignal) -> Self {
        Self {
            scope,
            done,
            running: Vec::new(),
            finished: Vec::new(),
        }
    }

    /// Spawn a task whose exit ends the session.
    pub fn spawn<F>(&mut self, task: &'static str, body: F)
    where
        F: FnOnce() -> Result<()> + Send + 'scope,
    {
        let done = self.done;
        let span = tracing::Span::current();
        let spawned = thread::Builder::new()
            .name(format!("rfbrelay-{task}"))
            .spawn_scoped(self.scope, move || {
                let _entered = span.enter();
                let _trip = TripOnExit { done, task };
                body()
            });
        match spawned {
            Ok(handle) => self.running.push((task, handle)),
            Err(error) => {
                done.trip(task);
                self.finished.push(TaskOutcome {
                    task,
                    result: Err(RelayError::unavailable(format!("{task} thread"), error)),
                });
            }
        }
    }

    /// Join every task, in spawn order.
    pub fn join(self) -> Vec<TaskOutcome> {
        let mut outcomes = self.finished;
        for (task, handle) in self.running {
            let result = handle.join().unwrap_or_else(|_| {
                Err(RelayError::Io(io::Error::other(format!("{task} task panicked"))))
            });
            outcomes.push(TaskOutcome { task, result });
        }
        outcomes
    }
}

/// Trips the signal when a task exits, including by panic.
struct TripOnExit<'a> {
    done: &'a DoneSignal,
    task: &'static str,
}

impl Drop for TripOnExit<'_> {
    fn drop(&mut self) {
        self.done.trip(self.task);
    }
}

/// Log every outcome: peer closes at debug, real failures at warn.
pub(crate) fn log_outcomes(outcomes: &[TaskOutcome]) {
    for outcome in outcomes {
        match &outcome.result {
            Ok(()) => tracing::debug!(task = outcome.task, "task finished"),
            Err(error) if error.is_peer_closed() => {
                tracing::debug!(task = outcome.task, %error, "task ended by peer");
            }
            Err(error) => tracing::warn!(task = outcome.task, %error, "task failed"),
        }
    }
}

/// First outcome that is an actual failure, rendered for summaries.
pub(crate) fn first_failure(outcomes: &[TaskOutcome]) -> Option<String> {
    outcomes.iter().find_map(|outcome| match &outcome.result {
        Err(error) if !error.is_peer_closed() => Some(format!("{}: {error}", outcome.task)),
        _ => None,
    })
}
