//! Connection state and observer fan-out

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Receives lifecycle and message notifications.
///
/// Callbacks run on the attempt-loop task, not on the caller's task.
/// Implementations must return quickly and hand off any real work.
pub trait ConnectionObserver: Send + Sync {
    fn on_state_change(&self, state: ConnectionState);

    fn on_message(&self, _message: &str) {}
}

/// Current state plus registered observers
pub(crate) struct Lifecycle {
    state: Mutex<ConnectionState>,
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers.write().push(observer);
    }

    /// Move to `next`, notifying observers only on an actual change
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, next)
        };
        if previous == next {
            return false;
        }

        info!(from = %previous, to = %next, "Connection state changed");
        for observer in self.snapshot() {
            observer.on_state_change(next);
        }
        true
    }

    pub(crate) fn dispatch_message(&self, message: &str) {
        for observer in self.snapshot() {
            observer.on_message(message);
        }
    }

    // Callbacks run without the observer lock held
    fn snapshot(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        self.observers.read().clone()
    }
}
