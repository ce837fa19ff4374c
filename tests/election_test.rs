//! End-to-end tests for term-based leader election among controller nodes.

use meshdb::election::Election;
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

async fn controller_node(port: u16, peers: &[u16]) -> (std::sync::Arc<Network>, std::sync::Arc<Election>) {
    let network = Network::start(NetConfig::new(local_id(port))).await.unwrap();

    let mut controllers: Vec<NodeId> = peers.iter().map(|p| local_id(*p)).collect();
    controllers.push(local_id(port));

    let election = Election::new(network.clone(), controllers, true);
    network.register_handler(election.clone()).await;
    election.start();

    for peer in peers {
        network.connect(local_id(*peer));
    }

    (network, election)
}

#[tokio::test]
async fn three_controllers_elect_a_single_leader() {
    let ports = [free_port(), free_port(), free_port()];

    let mut nodes = Vec::new();
    for (i, &port) in ports.iter().enumerate() {
        let peers: Vec<u16> = ports.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, p)| *p).collect();
        nodes.push(controller_node(port, &peers).await);
    }

    // Give the handshake and however many vote rounds the randomized
    // back-off needs time to settle — worst case a few back-off windows
    // of `random(5, 5*N)` seconds per failed round.
    let mut leader_name = None;
    for _ in 0..150 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let leaders: Vec<Option<NodeId>> = futures::future::join_all(nodes.iter().map(|(_, e)| e.leader())).await;
        if leaders.iter().all(|l| l.is_some()) && leaders.iter().all(|l| l == &leaders[0]) {
            leader_name = leaders[0].clone();
            break;
        }
    }

    assert!(leader_name.is_some(), "all three nodes should converge on the same leader");

    let leader_count = futures::future::join_all(nodes.iter().map(|(_, e)| e.is_leader()))
        .await
        .into_iter()
        .filter(|&is_leader| is_leader)
        .count();
    assert_eq!(leader_count, 1, "exactly one node should consider itself leader");

    for (network, election) in &nodes {
        election.shutdown();
        network.shutdown();
    }
}

#[tokio::test]
async fn database_node_discovers_leader_without_voting() {
    let controller_ports = [free_port(), free_port()];
    let mut controllers = Vec::new();
    for (i, &port) in controller_ports.iter().enumerate() {
        let peers: Vec<u16> = controller_ports.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, p)| *p).collect();
        controllers.push(controller_node(port, &peers).await);
    }

    let db_port = free_port();
    let db_network = Network::start(NetConfig::new(local_id(db_port))).await.unwrap();
    let controller_ids: Vec<NodeId> = controller_ports.iter().map(|p| local_id(*p)).collect();
    let db_election = Election::new(db_network.clone(), controller_ids.clone(), false);
    db_network.register_handler(db_election.clone()).await;
    db_election.start();
    for peer in &controller_ports {
        db_network.connect(local_id(*peer));
    }

    let mut found = None;
    for _ in 0..150 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        if let Some(leader) = db_election.leader().await {
            found = Some(leader);
            break;
        }
    }

    assert!(found.is_some(), "database node should learn the leader without ever casting a vote");
    assert!(!db_election.is_leader().await, "a database node never considers itself leader");

    db_election.shutdown();
    db_network.shutdown();
    for (network, election) in &controllers {
        election.shutdown();
        network.shutdown();
    }
}
