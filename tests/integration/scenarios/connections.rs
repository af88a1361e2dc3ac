//! Connection acceptance tests
//!
//! Accept notifications, ordering, and what each connection policy does to
//! the peer

use crate::integration::start_loopback;
use hark::config::ConnectionPolicy;
use hark::{ConnectionInfo, ListenerEvent};
use rstest::rstest;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const QUIET: Duration = Duration::from_millis(150);

fn expect_connection(event: ListenerEvent) -> ConnectionInfo {
    match event {
        ListenerEvent::Connection(info) => info,
        other => panic!("Expected Connection, got {:?}", other),
    }
}

// ============================================================================
// Accept notifications
// ============================================================================

#[rstest]
#[case(1)]
#[case(5)]
#[case(20)]
#[tokio::test]
async fn test_each_connection_emits_one_event_in_order(#[case] count: usize) {
    let (_server, handle, mut probe) = start_loopback(ConnectionPolicy::Hold).await;
    let addr = handle.local_addr();

    let mut clients = Vec::with_capacity(count);
    for _ in 0..count {
        clients.push(TcpStream::connect(addr).await.unwrap());
    }

    for (i, client) in clients.iter().enumerate() {
        let info = expect_connection(probe.next().await);
        assert_eq!(info.id, i as u64 + 1);
        assert_eq!(info.peer_addr, client.local_addr().unwrap());
        assert_eq!(info.local_addr, addr);
    }
    probe.expect_quiet(QUIET).await;

    let snapshot = handle.metrics().snapshot();
    assert_eq!(snapshot.connections_accepted, count as u64);
    assert_eq!(snapshot.connections_held, count as u64);

    handle.close().await.unwrap();
    assert_eq!(probe.next().await, ListenerEvent::Closed);
}

#[tokio::test]
async fn test_concurrent_connections_are_all_reported() {
    let (_server, handle, mut probe) = start_loopback(ConnectionPolicy::Hold).await;
    let addr = handle.local_addr();

    let clients = futures::future::join_all((0..16).map(|_| TcpStream::connect(addr))).await;
    assert!(clients.iter().all(|c| c.is_ok()));

    let mut ids: Vec<u64> = Vec::new();
    for _ in 0..16 {
        ids.push(expect_connection(probe.next().await).id);
    }
    assert_eq!(ids, (1..=16).collect::<Vec<_>>());
    probe.expect_quiet(QUIET).await;

    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_data_on_connection_emits_nothing() {
    let (_server, handle, mut probe) = start_loopback(ConnectionPolicy::Hold).await;

    let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
    expect_connection(probe.next().await);

    client.write_all(b"hello\r\nworld\r\n").await.unwrap();
    client.flush().await.unwrap();
    probe.expect_quiet(QUIET).await;

    drop(client);
    probe.expect_quiet(QUIET).await;

    assert_eq!(handle.metrics().snapshot().connections_accepted, 1);
    handle.close().await.unwrap();
    assert_eq!(probe.next().await, ListenerEvent::Closed);
}

// ============================================================================
// Connection policies
// ============================================================================

#[tokio::test]
async fn test_hold_keeps_peer_open_until_close() {
    let (_server, handle, mut probe) = start_loopback(ConnectionPolicy::Hold).await;

    let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
    expect_connection(probe.next().await);

    let mut buf = [0u8; 16];
    assert!(
        timeout(QUIET, client.read(&mut buf)).await.is_err(),
        "held connection should stay open"
    );

    handle.close().await.unwrap();

    let read = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("peer should see the connection end after close");
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_drop_closes_peer_immediately() {
    let (_server, handle, mut probe) = start_loopback(ConnectionPolicy::Drop).await;

    let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
    expect_connection(probe.next().await);

    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("dropped connection should end");
    assert!(matches!(read, Ok(0) | Err(_)));

    let snapshot = handle.metrics().snapshot();
    assert_eq!(snapshot.connections_accepted, 1);
    assert_eq!(snapshot.connections_held, 0);

    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_close_releases_held_connections() {
    let (_server, handle, mut probe) = start_loopback(ConnectionPolicy::Hold).await;
    let addr = handle.local_addr();

    let _a = TcpStream::connect(addr).await.unwrap();
    let _b = TcpStream::connect(addr).await.unwrap();
    expect_connection(probe.next().await);
    expect_connection(probe.next().await);

    let metrics = handle.metrics();
    let before = metrics.snapshot();
    assert_eq!(before.connections_held, 2);
    assert!(before.last_accept_time.is_some());

    handle.close().await.unwrap();
    assert_eq!(probe.next().await, ListenerEvent::Closed);

    let after = metrics.snapshot();
    assert_eq!(after.connections_held, 0);
    assert_eq!(after.connections_accepted, 2);
}

async fn wait_for_held(metrics: &hark::ListenerMetrics, expected: u64) {
    let reached = timeout(Duration::from_secs(2), async {
        while metrics.snapshot().connections_held != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        reached.is_ok(),
        "connections_held stuck at {} (expected {})",
        metrics.snapshot().connections_held,
        expected
    );
}

#[rstest]
#[case(1)]
#[case(50)]
#[tokio::test]
async fn test_hold_releases_connections_when_peers_hang_up(#[case] count: usize) {
    let (_server, handle, mut probe) = start_loopback(ConnectionPolicy::Hold).await;
    let addr = handle.local_addr();
    let metrics = handle.metrics();

    let mut clients = Vec::with_capacity(count);
    for _ in 0..count {
        clients.push(TcpStream::connect(addr).await.unwrap());
    }
    for _ in 0..count {
        expect_connection(probe.next().await);
    }
    wait_for_held(&metrics, count as u64).await;

    drop(clients);
    wait_for_held(&metrics, 0).await;

    // Peers leaving is not a lifecycle event
    probe.expect_quiet(QUIET).await;
    assert_eq!(metrics.snapshot().connections_accepted, count as u64);

    handle.close().await.unwrap();
    assert_eq!(probe.next().await, ListenerEvent::Closed);
}

#[tokio::test]
async fn test_hold_releases_peer_that_sent_data_before_leaving() {
    let (_server, handle, mut probe) = start_loopback(ConnectionPolicy::Hold).await;
    let metrics = handle.metrics();

    let mut chatty = TcpStream::connect(handle.local_addr()).await.unwrap();
    let quiet = TcpStream::connect(handle.local_addr()).await.unwrap();
    expect_connection(probe.next().await);
    expect_connection(probe.next().await);

    chatty.write_all(b"ping\r\n").await.unwrap();
    chatty.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    wait_for_held(&metrics, 2).await;

    drop(chatty);
    wait_for_held(&metrics, 1).await;
    probe.expect_quiet(QUIET).await;

    drop(quiet);
    wait_for_held(&metrics, 0).await;

    handle.close().await.unwrap();
    assert_eq!(probe.next().await, ListenerEvent::Closed);
}
