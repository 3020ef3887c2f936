//! Application protocol
//!
//! Identity reports, keepalives, acknowledgments and remote shutdown
//! commands carried over the managed connection.

mod handler;
mod message;

pub use handler::{HandlerHandle, HandlerSettings, Indicator, OutboundSink, ProtocolHandler};
pub use message::{extract_value, identity_report, value_frame};
