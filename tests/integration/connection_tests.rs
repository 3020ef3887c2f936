//! Connection manager lifecycle tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use wolskill_agent::connection::SendOutcome;
use wolskill_agent::error::{ConnectFailure, ReceiveError};
use wolskill_agent::transport::{Channel, Connector, Endpoint, FrameKind, WireFrame};
use wolskill_agent::{ConnectionManager, ConnectionManagerConfig, ConnectionState, Credentials};

use crate::common::{credentials, endpoint, wait_for_state, wait_until, Recorder, ScriptedConnector};

const BACKOFF: Duration = Duration::from_secs(5);

fn manager(connector: Arc<ScriptedConnector>) -> (Arc<ConnectionManager>, Arc<Recorder>) {
    let manager = ConnectionManager::new(
        connector,
        endpoint(),
        ConnectionManagerConfig {
            backoff: BACKOFF,
            max_message_bytes: 1024,
        },
    );
    let recorder = Arc::new(Recorder::default());
    manager.add_observer(recorder.clone());
    (manager, recorder)
}

/// Every Connected is eventually followed by exactly one Disconnected, and
/// no state is reported twice in a row
fn assert_well_formed(states: &[ConnectionState]) {
    for pair in states.windows(2) {
        assert_ne!(pair[0], pair[1], "repeated state in {:?}", states);
        if pair[0] == ConnectionState::Connected {
            assert_eq!(pair[1], ConnectionState::Disconnected, "{:?}", states);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_connects_after_failures_with_fixed_backoff() {
    let (connector, mut remotes) = ScriptedConnector::new(3);
    let (manager, recorder) = manager(connector.clone());

    let started = Instant::now();
    manager.connect(credentials()).await;
    wait_for_state(&manager, ConnectionState::Connected).await;
    let _remote = remotes.recv().await.unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= BACKOFF * 3, "connected after {:?}", elapsed);
    assert!(elapsed < BACKOFF * 3 + Duration::from_secs(1), "connected after {:?}", elapsed);
    assert_eq!(connector.attempts(), 4);

    let states = recorder.states.lock().clone();
    let connecting = states
        .iter()
        .filter(|s| **s == ConnectionState::Connecting)
        .count();
    assert_eq!(connecting, 4);
    assert_eq!(states.last(), Some(&ConnectionState::Connected));
    assert_well_formed(&states);

    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connected() {
    let (connector, mut remotes) = ScriptedConnector::new(0);
    let (manager, recorder) = manager(connector.clone());

    manager.connect(credentials()).await;
    wait_for_state(&manager, ConnectionState::Connected).await;
    let _remote = remotes.recv().await.unwrap();

    manager.disconnect().await;
    manager.disconnect().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(
        *recorder.states.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );

    // No further attempts once stopped
    tokio::time::sleep(BACKOFF * 4).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(manager.send("late"), SendOutcome::Ignored);
}

#[tokio::test(start_paused = true)]
async fn test_remote_close_triggers_reconnect() {
    let (connector, mut remotes) = ScriptedConnector::new(0);
    let (manager, recorder) = manager(connector.clone());

    manager.connect(credentials()).await;
    let first = remotes.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    // Ending the stream closes the session
    drop(first);
    let started = Instant::now();
    let _second = remotes.recv().await.unwrap();
    assert!(started.elapsed() >= BACKOFF);
    wait_for_state(&manager, ConnectionState::Connected).await;
    assert_eq!(connector.attempts(), 2);

    manager.disconnect().await;
    assert_well_formed(&recorder.states.lock());
}

#[tokio::test(start_paused = true)]
async fn test_send_reaches_remote() {
    let (connector, mut remotes) = ScriptedConnector::new(0);
    let (manager, _recorder) = manager(connector);

    manager.connect(credentials()).await;
    let mut remote = remotes.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    assert_eq!(manager.send("hello"), SendOutcome::Dispatched);
    assert_eq!(remote.sent.recv().await.as_deref(), Some("hello"));

    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_fragmented_message_is_delivered_once() {
    let (connector, mut remotes) = ScriptedConnector::new(0);
    let (manager, recorder) = manager(connector);

    manager.connect(credentials()).await;
    let remote = remotes.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    remote
        .frames
        .send(Ok(WireFrame::new(FrameKind::Text, "{\"val", false)))
        .unwrap();
    remote
        .frames
        .send(Ok(WireFrame::new(FrameKind::Ping, "", true)))
        .unwrap();
    remote
        .frames
        .send(Ok(WireFrame::new(FrameKind::Continuation, "ue\":\"po", false)))
        .unwrap();
    remote
        .frames
        .send(Ok(WireFrame::new(FrameKind::Continuation, "ng\"}", true)))
        .unwrap();

    wait_until(|| !recorder.messages.lock().is_empty()).await;
    assert_eq!(*recorder.messages.lock(), vec![r#"{"value":"pong"}"#.to_string()]);

    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_mid_message_discards_partial() {
    let (connector, mut remotes) = ScriptedConnector::new(0);
    let (manager, recorder) = manager(connector.clone());

    manager.connect(credentials()).await;
    let remote = remotes.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    remote
        .frames
        .send(Ok(WireFrame::new(FrameKind::Text, "{\"value\":", false)))
        .unwrap();
    remote.frames.send(Ok(WireFrame::close())).unwrap();

    wait_for_state(&manager, ConnectionState::Disconnected).await;
    assert!(recorder.messages.lock().is_empty());

    // The loop keeps going after the session ends
    let _next = remotes.recv().await.unwrap();
    assert_eq!(connector.attempts(), 2);

    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_receive_error_ends_session() {
    let (connector, mut remotes) = ScriptedConnector::new(0);
    let (manager, recorder) = manager(connector);

    manager.connect(credentials()).await;
    let remote = remotes.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    remote
        .frames
        .send(Err(ReceiveError::Transport("reset by peer".to_string())))
        .unwrap();
    wait_for_state(&manager, ConnectionState::Disconnected).await;

    manager.disconnect().await;
    assert_well_formed(&recorder.states.lock());
}

#[tokio::test(start_paused = true)]
async fn test_connect_replaces_running_loop() {
    let (connector, mut remotes) = ScriptedConnector::new(0);
    let (manager, recorder) = manager(connector.clone());

    manager.connect(credentials()).await;
    let _first = remotes.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    manager.connect(credentials()).await;
    let _second = remotes.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;
    assert_eq!(connector.attempts(), 2);

    manager.disconnect().await;
    assert_eq!(
        *recorder.states.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sends_keep_caller_order() {
    let (connector, mut remotes) = ScriptedConnector::new(0);
    let (manager, _recorder) = manager(connector);

    manager.connect(credentials()).await;
    let mut remote = remotes.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    // Two concurrent callers, each with its own ordered sequence
    let callers: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|tag| {
            let manager = manager.clone();
            tokio::spawn(async move {
                for i in 0..1000 {
                    assert_eq!(manager.send(format!("{}{}", tag, i)), SendOutcome::Dispatched);
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    for caller in callers {
        caller.await.unwrap();
    }

    let mut received = Vec::with_capacity(2000);
    while received.len() < 2000 {
        let message = tokio::time::timeout(Duration::from_secs(10), remote.sent.recv())
            .await
            .unwrap()
            .unwrap();
        received.push(message);
    }

    for tag in ["a", "b"] {
        let sequence: Vec<usize> = received
            .iter()
            .filter_map(|m| m.strip_prefix(tag))
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(sequence, (0..1000).collect::<Vec<_>>(), "caller {}", tag);
    }

    manager.disconnect().await;
}

/// Connector whose `open` never completes
struct StalledConnector(AtomicUsize);

#[async_trait]
impl Connector for StalledConnector {
    async fn open(
        &self,
        _endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> Result<Channel, ConnectFailure> {
        self.0.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_interrupts_pending_open() {
    let connector = Arc::new(StalledConnector(AtomicUsize::new(0)));
    let manager = ConnectionManager::new(
        connector.clone(),
        endpoint(),
        ConnectionManagerConfig::default(),
    );
    let recorder = Arc::new(Recorder::default());
    manager.add_observer(recorder.clone());

    manager.connect(credentials()).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(manager.state(), ConnectionState::Connecting);

    tokio::time::timeout(Duration::from_millis(100), manager.disconnect())
        .await
        .expect("disconnect waited on a pending open");

    assert_eq!(
        *recorder.states.lock(),
        vec![ConnectionState::Connecting, ConnectionState::Disconnected]
    );
    assert_eq!(connector.0.load(Ordering::SeqCst), 1);
}
