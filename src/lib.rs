//! WolSkill Agent - remote power-off agent
//!
//! Keeps one resilient WebSocket session to a cloud control endpoint,
//! reports the host's network identity, watches for acknowledgments and
//! powers the machine off when a command addressed to it arrives.

pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod power;
pub mod protocol;
pub mod transport;
pub mod util;

pub use config::Config;
pub use connection::{
    ConnectionManager, ConnectionManagerConfig, ConnectionObserver, ConnectionState,
};
pub use credentials::{CredentialStore, Credentials};
pub use protocol::{Indicator, ProtocolHandler};

/// Agent version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
