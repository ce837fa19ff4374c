//! End-to-end test for Chord ring stabilization across three nodes.

use meshdb::chord::ChordRing;
use meshdb::identity::NodeId;
use meshdb::net::{NetConfig, Network};
use std::net::TcpListener as StdTcpListener;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn local_id(port: u16) -> NodeId {
    NodeId::new("127.0.0.1", port)
}

async fn ring_node(port: u16, chord_id: u32) -> (std::sync::Arc<Network>, std::sync::Arc<ChordRing>) {
    let network = Network::start(NetConfig::new(local_id(port))).await.unwrap();
    let ring = ChordRing::new(network.clone(), chord_id);
    network.register_handler(ring.clone()).await;
    ring.start();
    (network, ring)
}

#[tokio::test]
async fn three_node_ring_stabilizes_into_a_single_cycle() {
    // Evenly spaced ids so successor order is unambiguous.
    let a = (free_port(), 0u32);
    let b = (free_port(), 1_000_000_000u32);
    let c = (free_port(), 2_000_000_000u32);

    let (net_a, ring_a) = ring_node(a.0, a.1).await;
    let (net_b, ring_b) = ring_node(b.0, b.1).await;
    let (net_c, ring_c) = ring_node(c.0, c.1).await;

    // B and C both join through A; stabilization discovers the rest.
    ring_b.join(&[local_id(a.0)]).await;
    ring_c.join(&[local_id(a.0)]).await;

    let mut converged = false;
    for _ in 0..60 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let succ_a = ring_a.successor().await;
        let succ_b = ring_b.successor().await;
        let succ_c = ring_c.successor().await;

        // A single 3-cycle: a -> b -> c -> a (ids are strictly increasing).
        if succ_a.node == local_id(b.0) && succ_b.node == local_id(c.0) && succ_c.node == local_id(a.0) {
            converged = true;
            break;
        }
    }

    assert!(converged, "ring should stabilize into a single a -> b -> c -> a cycle");

    let pred_a = ring_a.predecessor().await.map(|p| p.node);
    assert_eq!(pred_a, Some(local_id(c.0)));

    ring_a.shutdown();
    ring_b.shutdown();
    ring_c.shutdown();
    net_a.shutdown();
    net_b.shutdown();
    net_c.shutdown();
}
