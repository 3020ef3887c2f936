//! One live transport session

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::frame::{Assembled, MessageAssembler};
use super::{Channel, FrameSink, FrameSource};
use crate::error::ReceiveError;
use crate::metrics::METRICS;

/// Upper bound for a single write
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound for the close handshake
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of one receive call
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Message(String),
    /// Remote close frame or end of stream
    Closed,
}

/// An open channel: a receive path owned by the attempt loop and a write
/// half that may be shared with senders on other tasks.
pub struct Session {
    source: Box<dyn FrameSource>,
    assembler: MessageAssembler,
    writer: Arc<SessionWriter>,
}

impl Session {
    /// Wrap an open channel and start its writer task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(channel: Channel, max_message_bytes: usize) -> Self {
        Self {
            source: channel.source,
            assembler: MessageAssembler::new(max_message_bytes),
            writer: Arc::new(SessionWriter::spawn(channel.sink)),
        }
    }

    /// Shared handle to the write half
    pub fn writer(&self) -> Arc<SessionWriter> {
        self.writer.clone()
    }

    /// Wait for the next complete message
    pub async fn receive(&mut self) -> Result<Received, ReceiveError> {
        loop {
            let frame = match self.source.next_frame().await {
                Some(frame) => frame?,
                None => {
                    if self.assembler.has_partial() {
                        debug!("Stream ended inside a fragmented message");
                    }
                    return Ok(Received::Closed);
                }
            };

            trace!(kind = ?frame.kind, len = frame.payload.len(), fin = frame.fin, "Frame received");

            match self.assembler.push(frame)? {
                Assembled::Message(text) => return Ok(Received::Message(text)),
                Assembled::Closed => return Ok(Received::Closed),
                Assembled::Pending => continue,
            }
        }
    }

    /// Close the session, dropping the receive path
    pub async fn close(self) {
        let writer = self.writer;
        drop(self.source);
        writer.close().await;
    }
}

/// Write half of a session.
///
/// Messages are queued to a single writer task, so they reach the sink in
/// the order `send` was called.
pub struct SessionWriter {
    queue: mpsc::UnboundedSender<String>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SessionWriter {
    fn spawn(sink: Box<dyn FrameSink>) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(write_loop(sink, rx, stop_rx));

        Self {
            queue,
            stop_tx,
            task: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue one text message; never waits on I/O. False once the session
    /// is closed.
    pub fn send(&self, text: String) -> bool {
        if self.is_closed() {
            return false;
        }
        self.queue.send(text).is_ok()
    }

    /// Stop the writer task and release the sink; safe to call repeatedly
    /// and concurrently. Queued messages not yet written are dropped.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.stop_tx.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Session writer task failed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

async fn write_loop(
    mut sink: Box<dyn FrameSink>,
    mut queue: mpsc::UnboundedReceiver<String>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let text = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            text = queue.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };

        let len = text.len();
        let written = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            written = tokio::time::timeout(SEND_TIMEOUT, sink.send_text(text)) => written,
        };

        match written {
            Ok(Ok(())) => {
                METRICS.message_sent();
                trace!(len, "Message sent");
            }
            Ok(Err(e)) => debug!(error = %e, "Send failed"),
            Err(_) => warn!(timeout_secs = SEND_TIMEOUT.as_secs(), "Send timed out"),
        }
    }

    if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        debug!("Close handshake did not complete in time");
    }
}

/// Resolves once close is requested or the writer handle is gone
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}
