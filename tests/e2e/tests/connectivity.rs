//! Handshake, liveness and reconnection against a running broker

use config::IdleOverride;
use multiplexer_e2e_tests::{
    eventually, test_config, RawPeer, TestCluster, AUDIT, BACKEND, EVENT_TYPE, FRONTEND,
};
use std::time::Duration;
use types::MessageBuilder;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_password_gate() {
    let mut config = test_config();
    config.connection.password = Some("s3cret".to_string());
    let cluster = TestCluster::start_with(config.clone()).await.unwrap();

    let mut wrong = config.clone();
    wrong.connection.password = Some("guess".to_string());
    assert!(cluster.client_with(&wrong, FRONTEND).await.is_err());

    let mut missing = config.clone();
    missing.connection.password = None;
    assert!(cluster.client_with(&missing, FRONTEND).await.is_err());

    let admitted = cluster.client(FRONTEND).await.unwrap();
    cluster.wait_for_peers(FRONTEND, 1).await.unwrap();
    assert_eq!(
        cluster.broker().manager().peers_of_type(FRONTEND)[0].peer_id,
        admitted.instance_id()
    );

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_raw_peer_with_wrong_password_is_dropped() {
    let mut config = test_config();
    config.connection.password = Some("s3cret".to_string());
    let cluster = TestCluster::start_with(config).await.unwrap();

    let mut raw = RawPeer::connect(cluster.addr(), FRONTEND, 7, Some("nope"))
        .await
        .unwrap();
    assert!(raw.closed_within(WAIT).await);
    assert!(cluster.broker().manager().peers_of_type(FRONTEND).is_empty());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_silent_peer_is_closed_after_read_idle() {
    let mut config = test_config();
    config.connection.idle_overrides.push(IdleOverride {
        peer_type: AUDIT,
        read_idle_ms: 300,
        write_idle_ms: 100,
    });
    let cluster = TestCluster::start_with(config).await.unwrap();

    // A raw socket never heartbeats on its own.
    let mut raw = RawPeer::connect(cluster.addr(), AUDIT, 11, None).await.unwrap();
    raw.expect_welcome(WAIT).await.unwrap();
    cluster.wait_for_peers(AUDIT, 1).await.unwrap();

    assert!(raw.closed_within(WAIT).await);
    cluster.wait_for_peers(AUDIT, 0).await.unwrap();

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_heartbeats_keep_idle_client_connected() {
    let mut config = test_config();
    config.connection.idle.read_idle_ms = 400;
    config.connection.idle.write_idle_ms = 100;
    let cluster = TestCluster::start_with(config).await.unwrap();
    let client = cluster.client(FRONTEND).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1_200)).await;

    assert_eq!(cluster.broker().manager().peers_of_type(FRONTEND).len(), 1);
    assert!(client.receive(Duration::from_millis(50)).await.is_none());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_client_reconnects_after_broker_drops_it() {
    let cluster = TestCluster::start().await.unwrap();
    let client = cluster.client(BACKEND).await.unwrap();
    cluster.wait_for_peers(BACKEND, 1).await.unwrap();

    let manager = cluster.broker().manager();
    let first = manager.connections_of_type(BACKEND)[0].id();
    manager.connections_of_type(BACKEND)[0].close();

    let reconnected = eventually(Duration::from_secs(3), || {
        manager
            .connections_of_type(BACKEND)
            .first()
            .is_some_and(|c| c.id() != first)
    })
    .await;
    assert!(reconnected);
    assert_eq!(
        manager.peers_of_type(BACKEND)[0].peer_id,
        client.instance_id()
    );

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_same_peer_id_replaces_previous_connection() {
    let cluster = TestCluster::start().await.unwrap();

    let mut first = RawPeer::connect(cluster.addr(), FRONTEND, 42, None).await.unwrap();
    first.expect_welcome(WAIT).await.unwrap();
    cluster.wait_for_peers(FRONTEND, 1).await.unwrap();

    let mut second = RawPeer::connect(cluster.addr(), FRONTEND, 42, None).await.unwrap();
    second.expect_welcome(WAIT).await.unwrap();

    assert!(first.closed_within(WAIT).await);
    cluster.wait_for_peers(FRONTEND, 1).await.unwrap();

    // Traffic for the peer now flows over the newer socket.
    let sender = cluster.client(BACKEND).await.unwrap();
    let event = sender
        .manager()
        .create_message(EVENT_TYPE)
        .to(second.id())
        .payload(&b"for 42"[..])
        .build();
    sender
        .send(event, network::SendPolicy::OneOfType(types::peers::MULTIPLEXER))
        .unwrap();
    let received = second.next(WAIT).await.unwrap();
    assert_eq!(received.payload(), b"for 42");

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_ids_are_delivered_once() {
    let cluster = TestCluster::start().await.unwrap();
    let receiver = cluster.client(FRONTEND).await.unwrap();

    let mut raw = RawPeer::connect(cluster.addr(), BACKEND, 99, None).await.unwrap();
    raw.expect_welcome(WAIT).await.unwrap();
    cluster.wait_for_peers(BACKEND, 1).await.unwrap();

    let event = MessageBuilder::new(EVENT_TYPE)
        .from(raw.id())
        .payload(&b"once"[..])
        .build();
    raw.send(event.clone()).await.unwrap();
    raw.send(event.clone()).await.unwrap();

    let first = receiver.receive(WAIT).await.unwrap();
    assert_eq!(first.message.id, event.id);
    assert!(receiver.receive(Duration::from_millis(300)).await.is_none());

    cluster.shutdown().await;
}
