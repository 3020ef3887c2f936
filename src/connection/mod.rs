//! Connection management
//!
//! Handles the connection state machine, the retry loop and observer
//! notification.

mod manager;
mod state;

pub use manager::{ConnectionManager, ConnectionManagerConfig, SendOutcome};
pub use state::{ConnectionObserver, ConnectionState};
