//! Frame reassembly
//!
//! A logical message is an initial Text or Binary frame followed by zero or
//! more continuation frames, the last of which carries the final flag.
//! Control frames may be interleaved between fragments.

use bytes::{Bytes, BytesMut};

use crate::error::ReceiveError;

/// Frame opcode as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
    Continuation,
    Ping,
    Pong,
    Close,
}

/// One frame read from the wire
#[derive(Debug, Clone)]
pub struct WireFrame {
    pub kind: FrameKind,
    pub payload: Bytes,
    /// Final fragment of its message
    pub fin: bool,
}

impl WireFrame {
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>, fin: bool) -> Self {
        Self {
            kind,
            payload: payload.into(),
            fin,
        }
    }

    /// Complete, unfragmented text message
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(FrameKind::Text, text.into(), true)
    }

    pub fn close() -> Self {
        Self::new(FrameKind::Close, Bytes::new(), true)
    }
}

/// Result of feeding one frame to the assembler
#[derive(Debug, PartialEq, Eq)]
pub enum Assembled {
    /// A complete message
    Message(String),
    /// The remote closed the channel; any partial message was discarded
    Closed,
    /// More frames are needed
    Pending,
}

/// Accumulates fragments until a message completes
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    in_progress: Option<FrameKind>,
    limit: usize,
}

impl MessageAssembler {
    /// Create an assembler rejecting messages larger than `limit` bytes
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            in_progress: None,
            limit,
        }
    }

    /// True while a fragmented message is being accumulated
    pub fn has_partial(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Feed one frame
    pub fn push(&mut self, frame: WireFrame) -> Result<Assembled, ReceiveError> {
        match frame.kind {
            FrameKind::Ping | FrameKind::Pong => Ok(Assembled::Pending),
            FrameKind::Close => {
                self.reset();
                Ok(Assembled::Closed)
            }
            FrameKind::Text | FrameKind::Binary => {
                if self.in_progress.is_some() {
                    self.reset();
                    return Err(ReceiveError::Protocol(
                        "new message started before the previous one completed",
                    ));
                }
                self.check_size(frame.payload.len())?;

                if frame.fin {
                    return decode(frame.kind, frame.payload).map(Assembled::Message);
                }
                self.buffer.extend_from_slice(&frame.payload);
                self.in_progress = Some(frame.kind);
                Ok(Assembled::Pending)
            }
            FrameKind::Continuation => {
                let Some(kind) = self.in_progress else {
                    return Err(ReceiveError::Protocol(
                        "continuation frame without an initial fragment",
                    ));
                };
                self.check_size(self.buffer.len() + frame.payload.len())?;
                self.buffer.extend_from_slice(&frame.payload);

                if !frame.fin {
                    return Ok(Assembled::Pending);
                }
                self.in_progress = None;
                let payload = self.buffer.split().freeze();
                decode(kind, payload).map(Assembled::Message)
            }
        }
    }

    fn check_size(&mut self, len: usize) -> Result<(), ReceiveError> {
        if len > self.limit {
            self.reset();
            return Err(ReceiveError::TooLarge { limit: self.limit });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.in_progress = None;
    }
}

fn decode(kind: FrameKind, payload: Bytes) -> Result<String, ReceiveError> {
    match kind {
        FrameKind::Binary => Ok(String::from_utf8_lossy(&payload).into_owned()),
        _ => String::from_utf8(payload.to_vec())
            .map_err(|_| ReceiveError::Protocol("text message is not valid UTF-8")),
    }
}
