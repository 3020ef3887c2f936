//! Protocol handler over a scripted connection

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};

use wolskill_agent::identity::{InterfaceIdentity, StaticIdentity};
use wolskill_agent::protocol::{HandlerHandle, HandlerSettings, Indicator};
use wolskill_agent::transport::WireFrame;
use wolskill_agent::{ConnectionManager, ConnectionManagerConfig, ConnectionState, ProtocolHandler};

use crate::common::{credentials, endpoint, CountingPower, RemoteEnd, ScriptedConnector};

struct Agent {
    manager: Arc<ConnectionManager>,
    handler: HandlerHandle,
    power: Arc<CountingPower>,
    remotes: mpsc::UnboundedReceiver<RemoteEnd>,
}

fn agent() -> Agent {
    let (connector, remotes) = ScriptedConnector::new(0);
    let manager = ConnectionManager::new(
        connector,
        endpoint(),
        ConnectionManagerConfig::default(),
    );
    let power = Arc::new(CountingPower::default());
    let identity = Arc::new(StaticIdentity::new(vec![
        InterfaceIdentity::new("eth0", [0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]),
        InterfaceIdentity::new("wlan0", [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]),
    ]));

    let handler = ProtocolHandler::new(
        HandlerSettings::default(),
        manager.clone(),
        identity,
        power.clone(),
    )
    .spawn();
    manager.add_observer(handler.observer());

    Agent {
        manager,
        handler,
        power,
        remotes,
    }
}

async fn wait_for_indicator(indicator: &mut watch::Receiver<Indicator>, wanted: Indicator) {
    timeout(Duration::from_secs(120), indicator.wait_for(|current| *current == wanted))
        .await
        .expect("indicator timed out")
        .expect("handler stopped");
}

fn text(value: &str) -> Result<WireFrame, wolskill_agent::error::ReceiveError> {
    Ok(WireFrame::text(value))
}

#[tokio::test(start_paused = true)]
async fn test_identity_report_on_connect() {
    let mut agent = agent();
    let mut indicator = agent.handler.indicator();

    agent.manager.connect(credentials()).await;
    let mut remote = agent.remotes.recv().await.unwrap();
    wait_for_indicator(&mut indicator, Indicator::AwaitingAck).await;

    let report: serde_json::Value =
        serde_json::from_str(&remote.sent.recv().await.unwrap()).unwrap();
    assert_eq!(report["eth0"]["mac"], "00:1a:2b:3c:4d:5e");
    assert_eq!(report["wlan0"]["mac"], "aa:bb:cc:dd:ee:01");

    agent.manager.disconnect().await;
    wait_for_indicator(&mut indicator, Indicator::Idle).await;
    agent.handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_marks_stale_but_stays_connected() {
    let mut agent = agent();
    let mut indicator = agent.handler.indicator();

    agent.manager.connect(credentials()).await;
    let mut remote = agent.remotes.recv().await.unwrap();
    wait_for_indicator(&mut indicator, Indicator::AwaitingAck).await;
    let connected_at = Instant::now();

    wait_for_indicator(&mut indicator, Indicator::Stale).await;
    let elapsed = connected_at.elapsed();
    assert!(elapsed >= Duration::from_secs(40), "stale after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(41), "stale after {:?}", elapsed);
    assert_eq!(agent.manager.state(), ConnectionState::Connected);

    // Report at 0s, keepalive at 20s, report again at 30s
    let mut sent = Vec::new();
    while let Ok(message) = remote.sent.try_recv() {
        sent.push(message);
    }
    assert!(sent.len() >= 3, "sent {:?}", sent);
    assert!(sent.contains(&r#"{"value":"ping"}"#.to_string()));

    // A late ack restores the indicator
    remote.frames.send(text(r#"{"value":"pong"}"#)).unwrap();
    wait_for_indicator(&mut indicator, Indicator::AwaitingAck).await;

    agent.manager.disconnect().await;
    agent.handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_acks_keep_indicator_healthy() {
    let mut agent = agent();
    let mut indicator = agent.handler.indicator();

    agent.manager.connect(credentials()).await;
    let remote = agent.remotes.recv().await.unwrap();
    wait_for_indicator(&mut indicator, Indicator::AwaitingAck).await;

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(30)).await;
        remote.frames.send(text(r#"{"value":"pong"}"#)).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(*indicator.borrow(), Indicator::AwaitingAck);
    }

    assert_eq!(agent.power.count(), 0);
    agent.manager.disconnect().await;
    agent.handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_command_for_this_host() {
    let mut agent = agent();
    let mut indicator = agent.handler.indicator();

    agent.manager.connect(credentials()).await;
    let remote = agent.remotes.recv().await.unwrap();
    wait_for_indicator(&mut indicator, Indicator::AwaitingAck).await;

    remote.frames.send(text(r#"{"value":"99-99-99-99-99-99"}"#)).unwrap();
    remote.frames.send(text(r#"{"value":"AA-BB-CC-DD-EE-01"}"#)).unwrap();
    remote.frames.send(text(r#"{"other":"00-1A-2B-3C-4D-5E"}"#)).unwrap();

    crate::common::wait_until(|| agent.power.count() > 0).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(agent.power.count(), 1);
    assert_eq!(agent.manager.state(), ConnectionState::Connected);

    agent.manager.disconnect().await;
    agent.handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_timers_stop_after_disconnect() {
    let mut agent = agent();
    let mut indicator = agent.handler.indicator();

    agent.manager.connect(credentials()).await;
    let mut remote = agent.remotes.recv().await.unwrap();
    wait_for_indicator(&mut indicator, Indicator::AwaitingAck).await;

    // The report written on connect
    assert!(remote.sent.recv().await.is_some());

    agent.manager.disconnect().await;
    wait_for_indicator(&mut indicator, Indicator::Idle).await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(*indicator.borrow(), Indicator::Idle);

    // Nothing written after the disconnect
    assert!(remote.sent.try_recv().is_err());

    agent.handler.shutdown().await;
}
