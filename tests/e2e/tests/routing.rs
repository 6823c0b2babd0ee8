//! Broker routing: rules, fanout, overrides, direct addressing and errors

use multiplexer_e2e_tests::{
    test_config, TestCluster, AUDIT, BACKEND, EVENT_TYPE, FRONTEND, UNROUTED_TYPE,
};
use network::SendPolicy;
use std::time::Duration;
use types::{peers, Fanout, MetaType};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_events_rotate_across_peers_of_type() {
    let cluster = TestCluster::start().await.unwrap();
    let receivers = vec![
        cluster.client(FRONTEND).await.unwrap(),
        cluster.client(FRONTEND).await.unwrap(),
        cluster.client(FRONTEND).await.unwrap(),
    ];
    cluster.wait_for_peers(FRONTEND, 3).await.unwrap();
    let sender = cluster.client(BACKEND).await.unwrap();

    for i in 0..6u8 {
        sender.send_event(vec![i], EVENT_TYPE).unwrap();
    }

    for receiver in &receivers {
        for _ in 0..2 {
            let incoming = receiver.receive(WAIT).await.unwrap();
            assert_eq!(incoming.message.message_type, EVENT_TYPE);
            assert_eq!(incoming.message.from, sender.instance_id());
        }
        assert!(receiver.receive(QUIET).await.is_none());
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_fanout_all_reaches_every_peer() {
    let mut config = test_config();
    config.routing = config
        .routing
        .with_rule(EVENT_TYPE, vec![FRONTEND, AUDIT], Fanout::All);
    let cluster = TestCluster::start_with(config).await.unwrap();

    let frontends = vec![
        cluster.client(FRONTEND).await.unwrap(),
        cluster.client(FRONTEND).await.unwrap(),
    ];
    let audit = cluster.client(AUDIT).await.unwrap();
    cluster.wait_for_peers(FRONTEND, 2).await.unwrap();
    let sender = cluster.client(BACKEND).await.unwrap();

    sender.send_event(&b"tick"[..], EVENT_TYPE).unwrap();

    for receiver in frontends.iter().chain(std::iter::once(&audit)) {
        let incoming = receiver.receive(WAIT).await.unwrap();
        assert_eq!(incoming.message.payload(), b"tick");
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_override_rules_replace_routing_table() {
    let cluster = TestCluster::start().await.unwrap();
    let frontend = cluster.client(FRONTEND).await.unwrap();
    let audits = vec![
        cluster.client(AUDIT).await.unwrap(),
        cluster.client(AUDIT).await.unwrap(),
    ];
    cluster.wait_for_peers(AUDIT, 2).await.unwrap();
    let sender = cluster.client(BACKEND).await.unwrap();

    let event = sender
        .manager()
        .create_message(EVENT_TYPE)
        .route_override(AUDIT, Fanout::All)
        .payload(&b"audit only"[..])
        .build();
    sender
        .send(event, SendPolicy::OneOfType(peers::MULTIPLEXER))
        .unwrap();

    for audit in &audits {
        let incoming = audit.receive(WAIT).await.unwrap();
        assert_eq!(incoming.message.payload(), b"audit only");
    }
    assert!(frontend.receive(QUIET).await.is_none());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_target_id_bypasses_rules() {
    let cluster = TestCluster::start().await.unwrap();
    let bystander = cluster.client(FRONTEND).await.unwrap();
    let target = cluster.client(FRONTEND).await.unwrap();
    cluster.wait_for_peers(FRONTEND, 2).await.unwrap();
    let sender = cluster.client(BACKEND).await.unwrap();

    for _ in 0..3 {
        let direct = sender
            .manager()
            .create_message(EVENT_TYPE)
            .to(target.instance_id())
            .build();
        sender
            .send(direct, SendPolicy::OneOfType(peers::MULTIPLEXER))
            .unwrap();
    }

    for _ in 0..3 {
        assert!(target.receive(WAIT).await.is_some());
    }
    assert!(bystander.receive(QUIET).await.is_none());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unroutable_message_dropped_by_default() {
    let cluster = TestCluster::start().await.unwrap();
    let sender = cluster.client(BACKEND).await.unwrap();

    sender.send_event(&b"lost"[..], UNROUTED_TYPE).unwrap();

    assert!(sender.receive(QUIET).await.is_none());
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unroutable_message_answered_with_delivery_error() {
    let mut config = test_config();
    config.server.emit_delivery_errors = true;
    let cluster = TestCluster::start_with(config).await.unwrap();
    let sender = cluster.client(BACKEND).await.unwrap();

    let event = sender.manager().create_message(UNROUTED_TYPE).build();
    let event_id = event.id;
    sender
        .send(event, SendPolicy::OneOfType(peers::MULTIPLEXER))
        .unwrap();

    let error = sender.receive(WAIT).await.unwrap().message;
    assert!(error.is_type(MetaType::DeliveryError));
    assert_eq!(error.references, Some(event_id));
    assert_eq!(error.to, Some(sender.instance_id()));
    assert_eq!(error.from, cluster.broker().instance_id());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_broker_answers_ping() {
    let cluster = TestCluster::start().await.unwrap();
    let client = cluster.client(FRONTEND).await.unwrap();

    let ping = client.manager().create_message(MetaType::Ping.code()).build();
    let ping_id = ping.id;
    client
        .send(ping, SendPolicy::OneOfType(peers::MULTIPLEXER))
        .unwrap();

    let pong = client.receive(WAIT).await.unwrap().message;
    assert!(pong.is_type(MetaType::Ping));
    assert_eq!(pong.references, Some(ping_id));

    cluster.shutdown().await;
}
