//! Connection manager integration tests against a mock broker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use common::{MockBroker, SUBSCRIBE_LINE, StalledBroker, fast, manager, unreachable_endpoint};
use qikonode::health::health_check;
use qikonode::heartbeat::{HeartbeatConfig, spawn_heartbeat};
use qikonode::{ConnectionManager, ConnectionState, NodeError, RetryPolicy};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Connect / subscribe
// ============================================================================

#[tokio::test]
async fn test_subscribe_frame_is_first_line() {
    let broker = MockBroker::new().await;
    let conn = manager(broker.endpoint(), 5, 3);

    conn.connect().await.expect("connect");
    let mut device = broker.accept().await;

    conn.send(b"ping\r\n").await.expect("send");

    assert_eq!(device.next_line().await.as_deref(), Some(SUBSCRIBE_LINE));
    assert_eq!(device.next_line().await.as_deref(), Some("ping"));
    assert_eq!(conn.state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_repeated_connect_is_noop() {
    let broker = MockBroker::new().await;
    let conn = manager(broker.endpoint(), 5, 3);

    for _ in 0..3 {
        conn.connect().await.expect("connect");
    }
    let mut device = broker.accept().await;

    assert!(
        broker.try_accept(Duration::from_millis(200)).await.is_none(),
        "connect while connected must not open a second socket"
    );
    assert_eq!(conn.status().await.connects, 1);

    conn.send(b"ping\r\n").await.expect("send");
    assert_eq!(device.next_line().await.as_deref(), Some(SUBSCRIBE_LINE));
    assert_eq!(device.next_line().await.as_deref(), Some("ping"));
}

#[tokio::test]
async fn test_connect_gives_up_after_five_attempts() {
    let conn = manager(unreachable_endpoint().await, 5, 3);

    let result = conn.connect().await;

    assert!(matches!(
        result,
        Err(NodeError::Transport {
            operation: "connect",
            ..
        })
    ));
    assert_eq!(conn.state().await, ConnectionState::Disconnected);
    assert_eq!(conn.status().await.connects, 0);
}

fn stalled_manager(broker: &StalledBroker) -> Arc<ConnectionManager> {
    Arc::new(
        ConnectionManager::new(broker.endpoint())
            .expect("valid endpoint")
            .with_connect_policy(fast(RetryPolicy::connect(), 1))
            .with_io_policy(fast(RetryPolicy::io(), 1))
            .with_connect_timeout(Duration::from_secs(5)),
    )
}

#[tokio::test]
async fn test_status_readable_during_stalled_connect() {
    let broker = StalledBroker::new().await;
    let conn = stalled_manager(&broker);

    let connecting = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = timeout(Duration::from_millis(500), conn.status())
        .await
        .expect("status waited on the connect");
    assert_eq!(status.state, ConnectionState::Connecting);

    let Json(health) = timeout(Duration::from_millis(500), health_check(State(Arc::clone(&conn))))
        .await
        .expect("health check waited on the connect");
    assert_eq!(health.connection, "connecting");

    connecting.abort();
    assert!(connecting.await.is_err_and(|e| e.is_cancelled()));
    assert_eq!(conn.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_cancelled_loop_does_not_leave_connecting() {
    let broker = StalledBroker::new().await;
    let conn = stalled_manager(&broker);

    let cancel = CancellationToken::new();
    let heartbeat = spawn_heartbeat(Arc::clone(&conn), HeartbeatConfig::default(), cancel.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(conn.state().await, ConnectionState::Connecting);

    cancel.cancel();
    timeout(Duration::from_secs(1), heartbeat)
        .await
        .expect("heartbeat loop did not stop")
        .expect("heartbeat loop panicked");

    assert_eq!(conn.state().await, ConnectionState::Disconnected);
}

// ============================================================================
// Implicit reconnect
// ============================================================================

#[tokio::test]
async fn test_send_connects_when_disconnected() {
    let broker = MockBroker::new().await;
    let conn = manager(broker.endpoint(), 5, 3);

    conn.send(b"ping\r\n").await.expect("send");
    let mut device = broker.accept().await;

    assert_eq!(device.next_line().await.as_deref(), Some(SUBSCRIBE_LINE));
    assert_eq!(device.next_line().await.as_deref(), Some("ping"));
}

#[tokio::test]
async fn test_receive_connects_when_disconnected() {
    let broker = MockBroker::new().await;
    let conn = manager(broker.endpoint(), 5, 3);

    let broker_task = tokio::spawn(async move {
        let mut device = broker.accept().await;
        assert_eq!(device.next_line().await.as_deref(), Some(SUBSCRIBE_LINE));
        device.send_line("cmd=1&res=1").await;
        device
    });

    let data = conn.receive(1024).await.expect("receive");
    assert_eq!(data, b"cmd=1&res=1\r\n");
    drop(broker_task.await.expect("broker task"));
}

#[tokio::test]
async fn test_zero_length_read_marks_disconnected() {
    let broker = MockBroker::new().await;
    let conn = manager(broker.endpoint(), 1, 1);

    conn.connect().await.expect("connect");
    let mut device = broker.accept().await;
    assert_eq!(device.next_line().await.as_deref(), Some(SUBSCRIBE_LINE));
    drop(device);

    let result = conn.receive(1024).await;

    assert!(matches!(
        result,
        Err(NodeError::ConnectionClosed {
            operation: "receive"
        })
    ));
    assert_eq!(conn.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_receive_reconnects_after_peer_close() {
    let broker = MockBroker::new().await;
    let conn = manager(broker.endpoint(), 5, 3);

    conn.connect().await.expect("connect");
    let mut first = broker.accept().await;
    assert_eq!(first.next_line().await.as_deref(), Some(SUBSCRIBE_LINE));
    drop(first);

    let broker_task = tokio::spawn(async move {
        let mut device = broker.accept().await;
        assert_eq!(device.next_line().await.as_deref(), Some(SUBSCRIBE_LINE));
        device.send_line("cmd=2&uid=U1&topic=T1&msg=on").await;
        device
    });

    let data = conn.receive(1024).await.expect("receive after reconnect");
    assert_eq!(data, b"cmd=2&uid=U1&topic=T1&msg=on\r\n");
    assert_eq!(conn.status().await.connects, 2);
    drop(broker_task.await.expect("broker task"));
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_interrupts_pending_receive() {
    let broker = MockBroker::new().await;
    let conn = manager(broker.endpoint(), 1, 1);

    conn.connect().await.expect("connect");
    let mut device = broker.accept().await;

    let reader = Arc::clone(&conn);
    let pending = tokio::spawn(async move { reader.receive(1024).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    timeout(Duration::from_secs(1), conn.disconnect())
        .await
        .expect("disconnect blocked by pending receive");

    let result = timeout(Duration::from_secs(1), pending)
        .await
        .expect("receive did not return")
        .expect("receive task");
    assert!(matches!(result, Err(NodeError::ConnectionClosed { .. })));
    assert_eq!(conn.state().await, ConnectionState::Disconnected);

    assert_eq!(device.next_line().await.as_deref(), Some(SUBSCRIBE_LINE));
    device.wait_for_eof().await;
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let broker = MockBroker::new().await;
    let conn = manager(broker.endpoint(), 1, 1);

    conn.connect().await.expect("connect");
    let _device = broker.accept().await;

    conn.disconnect().await;
    conn.disconnect().await;

    let status = conn.status().await;
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.connected_since.is_none());
    assert_eq!(status.connects, 1);
}
