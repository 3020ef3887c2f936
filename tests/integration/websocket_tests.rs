//! End-to-end over a real WebSocket server on loopback

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::Message;

use wolskill_agent::identity::{InterfaceIdentity, StaticIdentity};
use wolskill_agent::protocol::{HandlerSettings, Indicator};
use wolskill_agent::transport::{Endpoint, WsConnector};
use wolskill_agent::{ConnectionManager, ConnectionManagerConfig, ConnectionState, ProtocolHandler};

use crate::common::{credentials, CountingPower};

const WAIT: Duration = Duration::from_secs(10);

/// One-connection server: records the request URI, forwards inbound text
/// and writes whatever the test queues.
struct TestServer {
    addr: SocketAddr,
    uri: oneshot::Receiver<String>,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<Message>,
}

async fn start_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uri_tx, uri) = oneshot::channel();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(listener);

        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(request.uri().to_string());
            Ok(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();
        let (mut sink, mut source) = ws.split();

        loop {
            tokio::select! {
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let _ = inbound_tx.send(text);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                },
                message = outbound_rx.recv() => match message {
                    Some(message) => {
                        let closing = matches!(message, Message::Close(_));
                        if sink.send(message).await.is_err() || closing {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    TestServer {
        addr,
        uri,
        inbound,
        outbound,
    }
}

fn endpoint(addr: SocketAddr) -> Endpoint {
    Endpoint::parse(&format!("ws://{}/prod", addr), "awsid", "license").unwrap()
}

fn fragment(data: &str, opcode: OpCode, fin: bool) -> Message {
    Message::Frame(Frame::message(data.as_bytes().to_vec(), opcode, fin))
}

async fn wait_for_indicator(indicator: &mut watch::Receiver<Indicator>, wanted: Indicator) {
    timeout(WAIT, indicator.wait_for(|current| *current == wanted))
        .await
        .expect("indicator timed out")
        .expect("handler stopped");
}

#[tokio::test]
async fn test_end_to_end_session() {
    let mut server = start_server().await;

    let connector = WsConnector::new(false, Duration::from_secs(5), 64 * 1024).unwrap();
    let manager = ConnectionManager::new(
        Arc::new(connector),
        endpoint(server.addr),
        ConnectionManagerConfig::default(),
    );
    let power = Arc::new(CountingPower::default());
    let identity = Arc::new(StaticIdentity::new(vec![InterfaceIdentity::new(
        "eth0",
        [0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e],
    )]));
    let settings = HandlerSettings {
        watchdog_timeout: Duration::from_millis(500),
        keepalive_interval: None,
        ..HandlerSettings::default()
    };
    let handler = ProtocolHandler::new(settings, manager.clone(), identity, power.clone()).spawn();
    manager.add_observer(handler.observer());
    let mut indicator = handler.indicator();

    manager.connect(credentials()).await;

    // Credentials travel in the upgrade query
    let uri = timeout(WAIT, server.uri).await.unwrap().unwrap();
    assert!(uri.starts_with("/prod?"), "uri {}", uri);
    assert!(uri.contains("awsid=agent-1"), "uri {}", uri);
    assert!(uri.contains("license=license-1"), "uri {}", uri);

    let report = timeout(WAIT, server.inbound.recv()).await.unwrap().unwrap();
    let report: serde_json::Value = serde_json::from_str(&report).unwrap();
    assert_eq!(report["eth0"]["mac"], "00:1a:2b:3c:4d:5e");
    assert_eq!(manager.state(), ConnectionState::Connected);

    // No ack yet: stale, but the transport stays up
    wait_for_indicator(&mut indicator, Indicator::Stale).await;
    assert_eq!(manager.state(), ConnectionState::Connected);

    // A fragmented ack is reassembled before it is interpreted
    server
        .outbound
        .send(fragment("{\"value\":", OpCode::Data(Data::Text), false))
        .unwrap();
    server
        .outbound
        .send(fragment("\"pong\"}", OpCode::Data(Data::Continue), true))
        .unwrap();
    wait_for_indicator(&mut indicator, Indicator::AwaitingAck).await;

    server
        .outbound
        .send(Message::Text(r#"{"value":"00-1A-2B-3C-4D-5E"}"#.to_string()))
        .unwrap();
    timeout(WAIT, async {
        while power.count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // Remote close drops the indicator back to idle
    server.outbound.send(Message::Close(None)).unwrap();
    wait_for_indicator(&mut indicator, Indicator::Idle).await;

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(power.count(), 1);
    handler.shutdown().await;
}

#[tokio::test]
async fn test_oversized_message_ends_session() {
    let server = start_server().await;

    let connector = WsConnector::new(false, Duration::from_secs(5), 1024).unwrap();
    let manager = ConnectionManager::new(
        Arc::new(connector),
        endpoint(server.addr),
        ConnectionManagerConfig {
            backoff: Duration::from_secs(60),
            max_message_bytes: 1024,
        },
    );

    manager.connect(credentials()).await;
    timeout(WAIT, async {
        while manager.state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    server
        .outbound
        .send(Message::Text("x".repeat(4096)))
        .unwrap();

    timeout(WAIT, async {
        while manager.state() == ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}
