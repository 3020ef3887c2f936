//! Error types
//!
//! Transport failures are collapsed into a handful of kinds. The connection
//! manager never differentiates connect failures for retry purposes; the
//! attached reason exists for logs only.

use std::path::PathBuf;
use thiserror::Error;

/// Any failure while establishing a session: DNS, TCP, TLS, HTTP status,
/// upgrade refusal or timeout.
#[derive(Debug, Error)]
#[error("connect failed: {reason}")]
pub struct ConnectFailure {
    reason: String,
}

impl ConnectFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Human-readable cause, for logging
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectFailure {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;

        match err {
            Error::Http(response) => {
                Self::new(format!("upgrade rejected with HTTP {}", response.status()))
            }
            other => Self::new(other.to_string()),
        }
    }
}

/// Failure while reading from an open session
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Endpoint construction errors
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported scheme {0:?} (expected ws or wss)")]
    UnsupportedScheme(String),

    #[error("endpoint url has no host")]
    MissingHost,
}

/// Credential store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no configuration directory available")]
    NoConfigDir,

    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode credentials: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("failed to decode {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
