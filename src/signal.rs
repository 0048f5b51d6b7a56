//! One-shot initialisation signal.

use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct SignalInner {
    outcome: Mutex<Option<Result<()>>>,
    resolved: Condvar,
}

/// Fires once, the first time the dictionary finishes loading its initial
/// stream, or fails before doing so. Every clone and every later observer
/// sees the same outcome.
#[derive(Clone)]
pub struct InitialisedSignal {
    inner: Arc<SignalInner>,
}

impl InitialisedSignal {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                outcome: Mutex::new(None),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Record the outcome. Only the first call has any effect.
    pub(crate) fn resolve(&self, outcome: Result<()>) -> bool {
        let mut slot = self.inner.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.inner.resolved.notify_all();
        true
    }

    /// True once the dictionary has initialised successfully.
    pub fn is_initialised(&self) -> bool {
        matches!(*self.inner.outcome.lock(), Some(Ok(())))
    }

    /// The outcome, if there is one yet.
    pub fn outcome(&self) -> Option<Result<()>> {
        self.inner.outcome.lock().clone()
    }

    /// Block until the outcome is known.
    pub fn wait(&self) -> Result<()> {
        let mut slot = self.inner.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.inner.resolved.wait(&mut slot);
        }
    }

    /// Block until the outcome is known or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.outcome.lock();
        while slot.is_none() {
            if self.inner.resolved.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.clone()
    }
}

impl std::fmt::Debug for InitialisedSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitialisedSignal")
            .field("outcome", &self.outcome())
            .finish()
    }
}
