//! Request/response through the broker, including discovery failover

use multiplexer_e2e_tests::{
    test_config, EchoHandler, FailingHandler, SilentHandler, TestCluster, BACKEND, FRONTEND,
    QUERY_RESPONSE_TYPE, QUERY_TYPE,
};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use types::{Fanout, MetaType};

#[tokio::test]
async fn test_query_echo_roundtrip() {
    let cluster = TestCluster::start().await.unwrap();
    let handler = EchoHandler::new();
    let served = handler.served();
    cluster.backend(BACKEND, handler).await.unwrap();
    let frontend = cluster.client(FRONTEND).await.unwrap();

    let reply = frontend
        .query(&b"hello"[..], QUERY_TYPE, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(reply.message_type, QUERY_RESPONSE_TYPE);
    assert_eq!(reply.payload(), b"hello");
    assert_eq!(reply.to, Some(frontend.instance_id()));
    assert!(reply.references.is_some());
    assert_eq!(served.load(Ordering::SeqCst), 1);

    let stats = cluster.broker().stats();
    assert!(stats.frames_in >= 4);
    assert_eq!(stats.received_by_type.get(&QUERY_TYPE), Some(&1));
    assert_eq!(stats.active_connections, 2);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_query_without_backend_times_out_in_discovery() {
    let cluster = TestCluster::start().await.unwrap();
    let frontend = cluster.client(FRONTEND).await.unwrap();
    let timeout = Duration::from_millis(300);

    let started = Instant::now();
    let err = frontend
        .query(&b"anyone?"[..], QUERY_TYPE, timeout)
        .await
        .unwrap_err();

    assert_eq!(err.timed_out_phase(), Some("phase 2"));
    assert!(err.is_operation_failed());
    assert!(started.elapsed() >= timeout * 2);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_silent_backend_fails_over_to_discovered_one() {
    let cluster = TestCluster::start().await.unwrap();

    // Bind order fixes the rotation: the silent backend gets the direct send,
    // the echo backend gets the discovery probe.
    cluster.backend(BACKEND, SilentHandler).await.unwrap();
    cluster.wait_for_peers(BACKEND, 1).await.unwrap();
    let echo = EchoHandler::new();
    let served = echo.served();
    let echo_client = cluster.backend(BACKEND, echo).await.unwrap();
    cluster.wait_for_peers(BACKEND, 2).await.unwrap();

    let frontend = cluster.client(FRONTEND).await.unwrap();
    let reply = frontend
        .query(&b"retry me"[..], QUERY_TYPE, Duration::from_millis(500))
        .await
        .unwrap();

    assert_eq!(reply.message_type, QUERY_RESPONSE_TYPE);
    assert_eq!(reply.payload(), b"retry me");
    assert_eq!(reply.from, echo_client.instance_id());
    assert_eq!(served.load(Ordering::SeqCst), 1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_backend_error_is_returned_when_every_backend_fails() {
    let mut config = test_config();
    config.routing = config
        .routing
        .with_rule(QUERY_TYPE, vec![BACKEND], Fanout::All);
    let cluster = TestCluster::start_with(config).await.unwrap();

    cluster
        .backend(BACKEND, FailingHandler::new("disk full"))
        .await
        .unwrap();
    cluster
        .backend(BACKEND, FailingHandler::new("disk full"))
        .await
        .unwrap();
    cluster.wait_for_peers(BACKEND, 2).await.unwrap();

    let frontend = cluster.client(FRONTEND).await.unwrap();
    let reply = frontend
        .query(&b"write"[..], QUERY_TYPE, Duration::from_secs(1))
        .await
        .unwrap();

    assert!(reply.is_type(MetaType::BackendError));
    assert!(String::from_utf8_lossy(reply.payload()).contains("disk full"));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_delivery_errors_end_query_early() {
    let mut config = test_config();
    config.server.emit_delivery_errors = true;
    let cluster = TestCluster::start_with(config).await.unwrap();
    let frontend = cluster.client(FRONTEND).await.unwrap();
    let timeout = Duration::from_secs(2);

    let started = Instant::now();
    let err = frontend
        .query(&b"nobody"[..], QUERY_TYPE, timeout)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        client::QueryError::BackendUnreachable { message_type } if message_type == QUERY_TYPE
    ));
    assert!(started.elapsed() < timeout);

    cluster.shutdown().await;
}
