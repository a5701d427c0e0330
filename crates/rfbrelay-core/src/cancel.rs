//! Session-wide done signal.
//!
//! Every task of a bridge or playback session holds the same [`DoneSignal`].
//! The first task to finish trips it; the session owner waits on it, tears
//! down the shared endpoints, and then joins the remaining tasks.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    tripped_by: Option<&'static str>,
}

/// One-shot cancellation signal shared by the tasks of a session.
#[derive(Debug, Clone, Default)]
pub struct DoneSignal {
    inner: Arc<(Mutex<State>, Condvar)>,
}

impl DoneSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Trip the signal on behalf of `task`. Only the first caller is recorded.
    pub fn trip(&self, task: &'static str) {
        let mut state = self.state();
        if state.tripped_by.is_none() {
            state.tripped_by = Some(task);
            self.inner.1.notify_all();
        }
    }

    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.state().tripped_by.is_some()
    }

    /// Name of the task that tripped the signal first.
    #[must_use]
    pub fn tripped_by(&self) -> Option<&'static str> {
        self.state().tripped_by
    }

    /// Block until the signal trips.
    pub fn wait(&self) -> &'static str {
        let mut state = self.state();
        loop {
            if let Some(task) = state.tripped_by {
                return task;
            }
            state = self
                .inner
                .1
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block for at most `timeout`; returns `true` if the signal tripped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.state();
        let (state, _) = self
            .inner
            .1
            .wait_timeout_while(state, timeout, |state| state.tripped_by.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.tripped_by.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn first_trip_wins() {
        let done = DoneSignal::new();
        assert!(!done.is_tripped());
        done.trip("a");
        done.trip("b");
        assert_eq!(done.tripped_by(), Some("a"));
        assert_eq!(done.wait(), "a");
    }

    #[test]
    fn wait_wakes_on_trip_from_other_thread() {
        let done = DoneSignal::new();
        let remote = done.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.trip("worker");
        });
        assert_eq!(done.wait(), "worker");
        handle.join().expect("join");
    }

    #[test]
    fn wait_timeout_expires_when_untripped() {
        let done = DoneSignal::new();
        let start = Instant::now();
        assert!(!done.wait_timeout(Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
