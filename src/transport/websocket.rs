//! WebSocket-over-TLS connector
//!
//! Resolves the endpoint, negotiates TLS 1.2+ and completes the HTTP upgrade
//! with `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Channel, Connector, Endpoint, FrameKind, FrameSink, FrameSource, WireFrame};
use crate::credentials::Credentials;
use crate::error::{ConnectFailure, ReceiveError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket channels to the control endpoint
pub struct WsConnector {
    tls: Arc<rustls::ClientConfig>,
    connect_timeout: Duration,
    max_message_bytes: usize,
}

impl WsConnector {
    /// Create a connector; `insecure` disables certificate verification
    pub fn new(
        insecure: bool,
        connect_timeout: Duration,
        max_message_bytes: usize,
    ) -> Result<Self, rustls::Error> {
        Ok(Self {
            tls: Arc::new(build_tls_config(insecure)?),
            connect_timeout,
            max_message_bytes,
        })
    }

    fn ws_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_bytes);
        config.max_frame_size = Some(self.max_message_bytes);
        config
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Channel, ConnectFailure> {
        let request = endpoint
            .request_url(credentials)
            .as_str()
            .into_client_request()?;

        debug!(%endpoint, "Opening WebSocket session");

        let connecting = tokio_tungstenite::connect_async_tls_with_config(
            request,
            Some(self.ws_config()),
            true,
            Some(tokio_tungstenite::Connector::Rustls(self.tls.clone())),
        );

        let (stream, response) = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| {
                ConnectFailure::new(format!(
                    "timed out after {}s",
                    self.connect_timeout.as_secs()
                ))
            })??;

        info!(%endpoint, status = %response.status(), "WebSocket upgrade complete");

        let (sink, source) = stream.split();
        Ok(Channel {
            source: Box::new(WsSource(source)),
            sink: Box::new(WsSink(sink)),
        })
    }
}

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<WireFrame, ReceiveError>> {
        loop {
            let frame = match self.0.next().await? {
                Ok(Message::Text(text)) => WireFrame::text(text),
                Ok(Message::Binary(data)) => WireFrame::new(FrameKind::Binary, data, true),
                Ok(Message::Ping(data)) => WireFrame::new(FrameKind::Ping, data, true),
                Ok(Message::Pong(data)) => WireFrame::new(FrameKind::Pong, data, true),
                Ok(Message::Close(reason)) => {
                    debug!(?reason, "Close frame received");
                    WireFrame::close()
                }
                // Raw frames are only produced on the write path
                Ok(Message::Frame(_)) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(ReceiveError::Transport(e.to_string()))),
            };
            return Some(Ok(frame));
        }
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> anyhow::Result<()> {
        self.0.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.0.close().await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}

/// TLS client configuration restricted to TLS 1.2 and 1.3
fn build_tls_config(insecure: bool) -> Result<rustls::ClientConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?;

    let config = if insecure {
        warn!("TLS certificate verification disabled (insecure mode)");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureServerVerifier { provider }))
            .with_no_client_auth()
    } else {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };

    Ok(config)
}

/// Accepts any server certificate, still checking handshake signatures
#[derive(Debug)]
struct InsecureServerVerifier {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl rustls::client::danger::ServerCertVerifier for InsecureServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
