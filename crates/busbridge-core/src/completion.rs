//! One-shot completion used to turn a native callback into a blocking call.
//!
//! The issuing thread creates a context, hands it to the native request as
//! user data and blocks in [`CompletionContext::wait`]. The callback, on a bus
//! thread, stores the outcome and signals. Single writer, single reader: the
//! first [`CompletionContext::set_event`] publishes the outcome and freezes it.

use crate::Status;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

struct State<T> {
    signaled: bool,
    status: Status,
    value: Option<T>,
}

/// Value-carrying one-shot signal.
pub struct CompletionContext<T> {
    state: Mutex<State<T>>,
    signal: Condvar,
}

/// Completion of a remote property read.
pub type PropertyGetContext<T> = CompletionContext<T>;

/// Completion of a remote property write; carries only a status.
pub type PropertySetContext = CompletionContext<()>;

impl<T> CompletionContext<T> {
    /// Unsignaled, with status `FAIL` and no value.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                signaled: false,
                status: Status::FAIL,
                value: None,
            }),
            signal: Condvar::new(),
        }
    }

    pub fn set_status(&self, status: Status) {
        let mut state = self.state.lock();
        if state.signaled {
            tracing::warn!("Ignoring status {} set after completion", status);
            return;
        }
        state.status = status;
    }

    pub fn set_value(&self, value: T) {
        let mut state = self.state.lock();
        if state.signaled {
            tracing::warn!("Ignoring value set after completion");
            return;
        }
        state.value = Some(value);
    }

    /// Publish the outcome and wake the waiter. Only the first call counts.
    pub fn set_event(&self) {
        let mut state = self.state.lock();
        if state.signaled {
            tracing::warn!("Completion signaled more than once");
            return;
        }
        state.signaled = true;
        self.signal.notify_all();
    }

    /// Set status and value and signal under one lock.
    pub fn complete(&self, status: Status, value: Option<T>) {
        let mut state = self.state.lock();
        if state.signaled {
            tracing::warn!("Completion signaled more than once");
            return;
        }
        state.status = status;
        state.value = value;
        state.signaled = true;
        self.signal.notify_all();
    }

    /// Block until signaled.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        self.signal.wait_while(&mut state, |s| !s.signaled);
    }

    /// Block until signaled or `timeout` elapses. Returns whether it was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.signal.wait_while_for(&mut state, |s| !s.signaled, timeout);
        state.signaled
    }

    pub fn is_signaled(&self) -> bool {
        self.state.lock().signaled
    }

    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    /// Move the value out, leaving `None`.
    pub fn take_value(&self) -> Option<T> {
        self.state.lock().value.take()
    }
}

impl<T: Clone> CompletionContext<T> {
    pub fn value(&self) -> Option<T> {
        self.state.lock().value.clone()
    }
}

impl<T> Default for CompletionContext<T> {
    fn default() -> Self {
        Self::new()
    }
}
