//! End-to-end tests for the peer network: the join handshake, heartbeats,
//! and request/response correlation over real loopback TCP.

use meshdb::document::Document;
use meshdb::identity::NodeId;
use meshdb::net::{Direction, Message, NetConfig, Network, Status};
use std::net::TcpListener as StdTcpListener;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn local_id(port: u16) -> NodeId {
    NodeId::new("127.0.0.1", port)
}

#[tokio::test]
async fn two_node_handshake_establishes_both_directions() {
    let port_a = free_port();
    let port_b = free_port();

    let net_a = Network::start(NetConfig::new(local_id(port_a))).await.unwrap();
    let net_b = Network::start(NetConfig::new(local_id(port_b))).await.unwrap();

    net_a.connect(local_id(port_b));

    tokio::time::sleep(Duration::from_millis(300)).await;

    let a_sees = net_a.connected_nodes().await;
    let b_sees = net_b.connected_nodes().await;
    assert!(a_sees.contains(&local_id(port_b)), "a should see b: {a_sees:?}");
    assert!(b_sees.contains(&local_id(port_a)), "b should see a: {b_sees:?}");

    net_a.shutdown();
    net_b.shutdown();
}

#[tokio::test]
async fn request_to_a_peer_with_no_handler_times_out() {
    let port_a = free_port();
    let port_b = free_port();

    let net_a = Network::start(NetConfig::new(local_id(port_a))).await.unwrap();
    let net_b = Network::start(NetConfig::new(local_id(port_b))).await.unwrap();

    assert!(net_a.join(local_id(port_b)).await);

    // Nobody on `b` ever answers `SomeUnknownKind`, so the waiter on `a`
    // should expire via the maintenance loop rather than hang forever.
    // A short explicit expiry keeps the test from waiting out the default
    // 60-second window.
    let message = Message::new(9001, "SomeUnknownKind", Document::new(), local_id(port_b), Direction::Outgoing)
        .waiting_for_response(true)
        .with_expiry(Duration::from_millis(200));
    let handle = message.clone();
    net_a.send(message).await;
    let status = handle.block_until_done().await;

    assert_eq!(status, Status::ResponseTimeout);

    net_a.shutdown();
    net_b.shutdown();
}

#[tokio::test]
async fn join_to_an_unreachable_address_fails_cleanly() {
    let port_a = free_port();
    let dead_port = free_port(); // nothing listens here

    let net_a = Network::start(NetConfig::new(local_id(port_a))).await.unwrap();

    let joined = net_a.join(local_id(dead_port)).await;
    assert!(!joined);
    assert!(net_a.connected_nodes().await.is_empty());

    net_a.shutdown();
}
