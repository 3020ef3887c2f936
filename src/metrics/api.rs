//! HTTP status endpoint
//!
//! Reports the connection state, the liveness indicator and counters as JSON.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::counters::{MetricsSnapshot, METRICS};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::protocol::Indicator;

/// How long a client may take to send its request
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// What the status endpoint reads from
#[derive(Clone)]
pub struct StatusSource {
    pub manager: Arc<ConnectionManager>,
    pub indicator: watch::Receiver<Indicator>,
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    endpoint: String,
    state: ConnectionState,
    indicator: Indicator,
    connected: bool,
    stats: MetricsSnapshot,
}

impl StatusSource {
    fn status(&self) -> StatusResponse {
        let indicator = *self.indicator.borrow();
        StatusResponse {
            version: crate::VERSION,
            endpoint: self.manager.endpoint().to_string(),
            state: self.manager.state(),
            indicator,
            connected: indicator.is_connected(),
            stats: METRICS.snapshot(),
        }
    }
}

/// Start the status API server, returning the bound address
///
/// Responds to:
/// - GET /status - connection state, indicator and counters
pub fn start_api_server(addr: SocketAddr, source: StatusSource) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind(addr)?;
    let bound = listener.local_addr()?;
    thread::Builder::new()
        .name("status-api".to_string())
        .spawn(move || serve(listener, source))?;
    info!(addr = %bound, "Status API server started");
    Ok(bound)
}

fn serve(listener: TcpListener, source: StatusSource) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let source = source.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_request(stream, &source) {
                        debug!(error = %e, "Request handling error");
                    }
                });
            }
            Err(e) => warn!(error = %e, "Failed to accept connection"),
        }
    }
    error!("Status API listener stopped");
}

fn handle_request(mut stream: TcpStream, source: &StatusSource) -> std::io::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut buffer = [0u8; 1024];
    let n = stream.read(&mut buffer)?;
    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..n]);
    let (status, body) = route(request.lines().next().unwrap_or(""), source);

    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes())?;
    stream.flush()
}

fn route(request_line: &str, source: &StatusSource) -> (&'static str, String) {
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");

    match (method, path) {
        ("GET", "/status") => (
            "200 OK",
            serde_json::to_string_pretty(&source.status()).unwrap_or_default(),
        ),
        ("GET", _) => ("404 Not Found", r#"{"error": "Not found"}"#.to_string()),
        _ => (
            "405 Method Not Allowed",
            r#"{"error": "Method not allowed"}"#.to_string(),
        ),
    }
}
