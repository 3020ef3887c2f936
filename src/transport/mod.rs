//! Transport sessions
//!
//! One [`Session`] is one physical duplex connection: opened by a
//! [`Connector`], read through a fragment-reassembling receive path, written
//! through a shared [`SessionWriter`], closed idempotently.

mod endpoint;
mod frame;
mod session;
mod websocket;

use async_trait::async_trait;

pub use endpoint::Endpoint;
pub use frame::{Assembled, FrameKind, MessageAssembler, WireFrame};
pub use session::{Received, Session, SessionWriter};
pub use websocket::WsConnector;

use crate::credentials::Credentials;
use crate::error::{ConnectFailure, ReceiveError};

/// Inbound half of an open channel
#[async_trait]
pub trait FrameSource: Send {
    /// Next raw frame; `None` once the stream has ended
    async fn next_frame(&mut self) -> Option<Result<WireFrame, ReceiveError>>;
}

/// Outbound half of an open channel
#[async_trait]
pub trait FrameSink: Send {
    /// Write one complete text message
    async fn send_text(&mut self, text: String) -> anyhow::Result<()>;

    /// Start the close handshake and release the write half
    async fn close(&mut self);
}

/// A freshly upgraded duplex channel
pub struct Channel {
    pub source: Box<dyn FrameSource>,
    pub sink: Box<dyn FrameSink>,
}

/// Opens channels to the control endpoint.
///
/// Every failure is reported as a single [`ConnectFailure`]; callers never
/// branch on the cause.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Channel, ConnectFailure>;
}
