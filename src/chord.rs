//! Chord ring maintenance: successor/predecessor stabilization and a
//! 32-entry finger table.

use crate::document::Document;
use crate::identity::NodeId;
use crate::net::kinds;
use crate::net::shutdown::{responsive_sleep, Running};
use crate::net::{Direction, Message, MessageHandler, Network};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Slots `1..=31`; `fingerTable[0]` is always mirrored from `successor`
/// rather than stored separately.
const FINGER_COUNT: usize = 31;

/// Strict circular containment on `u32` with both endpoints excluded.
pub fn between(num: u32, min: u32, max: u32) -> bool {
    if min < max {
        min < num && num < max
    } else {
        num > min || num < max
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordNode {
    pub node: NodeId,
    pub chord_id: u32,
}

struct ChordState {
    successor: ChordNode,
    predecessor: Option<ChordNode>,
    fingers: Vec<Option<ChordNode>>,
    next_finger_to_fix: usize,
}

pub struct ChordRing {
    network: Arc<Network>,
    self_node: ChordNode,
    state: RwLock<ChordState>,
    running: Running,
}

impl ChordRing {
    pub fn new(network: Arc<Network>, chord_id: u32) -> Arc<Self> {
        let self_node = ChordNode { node: network.local().clone(), chord_id };
        Arc::new(Self {
            network,
            state: RwLock::new(ChordState {
                successor: self_node.clone(),
                predecessor: None,
                fingers: vec![None; FINGER_COUNT],
                next_finger_to_fix: 1,
            }),
            self_node,
            running: Running::new(),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let ring = self.clone();
        tokio::spawn(async move { ring.stabilize_loop().await });
    }

    pub fn shutdown(&self) {
        self.running.stop();
    }

    pub async fn successor(&self) -> ChordNode {
        self.state.read().await.successor.clone()
    }

    pub async fn predecessor(&self) -> Option<ChordNode> {
        self.state.read().await.predecessor.clone()
    }

    /// Contacts each seed in turn, adopting the first successful
    /// `ChordSuccessorResponse` as this node's successor. Falls back to a
    /// single-node ring if the advertised successor can't be reached.
    pub async fn join(&self, seeds: &[NodeId]) {
        for seed in seeds {
            if !self.network.join(seed.clone()).await {
                continue;
            }

            let reply = self
                .network
                .request(kinds::CHORD_SUCCESSOR_REQUEST, Document::new(), seed.clone(), Direction::Outgoing)
                .await;
            if !reply.status().await.is_success() {
                continue;
            }
            let Some(response) = reply.response().await else { continue };
            let Some(successor_name) = response.payload.get_str("Successor") else { continue };
            let Some(chord_id) = response.payload.get_int("ChordId") else { continue };
            let Ok(successor_node) = NodeId::parse(successor_name) else { continue };

            if successor_node == self.self_node.node {
                self.state.write().await.successor = self.self_node.clone();
                return;
            }

            if self.network.join(successor_node.clone()).await {
                self.state.write().await.successor = ChordNode { node: successor_node, chord_id: chord_id as u32 };
            } else {
                self.state.write().await.successor = self.self_node.clone();
            }
            return;
        }
    }

    async fn handle_successor_request(&self) -> Document {
        let successor = self.state.read().await.successor.clone();
        kinds::chord_successor_response_payload(&successor.node.to_string(), successor.chord_id)
    }

    async fn handle_predecessor_request(&self) -> Document {
        match self.state.read().await.predecessor.clone() {
            Some(p) => kinds::chord_predecessor_response_payload(&p.node.to_string(), p.chord_id),
            None => kinds::chord_predecessor_response_payload(":0", 0),
        }
    }

    async fn handle_notify(&self, node_name: &str, chord_id: u32) {
        let Ok(node) = NodeId::parse(node_name) else { return };

        let should_adopt = {
            let state = self.state.read().await;
            match &state.predecessor {
                None => true,
                Some(p) => between(chord_id, p.chord_id, self.self_node.chord_id),
            }
        };
        if !should_adopt {
            return;
        }

        if self.network.join(node.clone()).await {
            self.state.write().await.predecessor = Some(ChordNode { node, chord_id });
        }
        // Connect failure: leave the existing predecessor (or none) as-is.
    }

    async fn stabilize_loop(self: Arc<Self>) {
        while responsive_sleep(Duration::from_millis(500), &self.running).await {
            self.stabilize_once().await;
        }
        info!("chord stabilize loop exiting");
    }

    async fn stabilize_once(&self) {
        let successor = self.state.read().await.successor.clone();

        // When `successor == self` (a single-node ring, or one not yet
        // discovered by anybody), "asking the successor for its
        // predecessor" is just reading our own `predecessor` field — no
        // round trip needed, and skipping this step entirely would leave
        // a bootstrap node permanently stuck pointing at itself even
        // after another node has notified it.
        let candidate: Option<ChordNode> = if successor.node != self.self_node.node {
            let reply = self
                .network
                .request(kinds::CHORD_PREDECESSOR_REQUEST, Document::new(), successor.node.clone(), Direction::Outgoing)
                .await;
            if reply.status().await.is_success() {
                reply.response().await.and_then(|response| {
                    let hostname = response.payload.get_str("Predecessor").unwrap_or(":0");
                    let chord_id = response.payload.get_int("ChordId").unwrap_or(0) as u32;
                    if hostname.is_empty() || hostname == ":0" {
                        None
                    } else {
                        NodeId::parse(hostname).ok().map(|node| ChordNode { node, chord_id })
                    }
                })
            } else {
                None
            }
        } else {
            self.state.read().await.predecessor.clone()
        };

        if let Some(p) = candidate {
            if between(p.chord_id, self.self_node.chord_id, successor.chord_id) {
                if self.network.join(p.node.clone()).await {
                    self.state.write().await.successor = p;
                } else {
                    self.state.write().await.successor = self.self_node.clone();
                }
            }
        }

        let successor = self.state.read().await.successor.clone();
        if successor.node != self.self_node.node {
            let payload = kinds::chord_notify_payload(&self.self_node.node.to_string(), self.self_node.chord_id);
            self.network.notify(kinds::CHORD_NOTIFY, payload, successor.node, Direction::Outgoing).await;
        }

        self.fix_next_finger().await;
    }

    async fn fix_next_finger(&self) {
        let index = {
            let mut state = self.state.write().await;
            state.next_finger_to_fix += 1;
            if state.next_finger_to_fix > FINGER_COUNT {
                state.next_finger_to_fix = 1;
            }
            state.next_finger_to_fix
        };

        let target = self.self_node.chord_id.wrapping_add(1u32 << (index - 1));
        let candidate = self.find_successor(target).await;

        self.state.write().await.fingers[index - 1] = candidate;
    }

    /// `FindSuccessor(id)`: local answer if `id` falls in `(self, successor]`,
    /// otherwise forward to the closest preceding node.
    pub async fn find_successor(&self, id: u32) -> Option<ChordNode> {
        let successor = self.state.read().await.successor.clone();
        if id == successor.chord_id || between(id, self.self_node.chord_id, successor.chord_id) {
            return Some(successor);
        }

        let closest = self.closest_preceding_node(id).await;
        if closest.node == self.self_node.node {
            return Some(successor);
        }

        let reply = self
            .network
            .request(kinds::CHORD_SUCCESSOR_REQUEST, Document::new(), closest.node, Direction::Outgoing)
            .await;
        if !reply.status().await.is_success() {
            return None;
        }
        let response = reply.response().await?;
        let name = response.payload.get_str("Successor")?;
        let chord_id = response.payload.get_int("ChordId")? as u32;
        let node = NodeId::parse(name).ok()?;
        Some(ChordNode { node, chord_id })
    }

    async fn closest_preceding_node(&self, id: u32) -> ChordNode {
        let state = self.state.read().await;
        for finger in state.fingers.iter().rev() {
            if let Some(candidate) = finger {
                if between(candidate.chord_id, self.self_node.chord_id, id) {
                    return candidate.clone();
                }
            }
        }
        state.successor.clone()
    }
}

#[async_trait]
impl MessageHandler for ChordRing {
    async fn handle_message(&self, message: Message) -> bool {
        match message.kind.as_str() {
            kinds::CHORD_SUCCESSOR_REQUEST => {
                let payload = self.handle_successor_request().await;
                self.network.reply(&message, kinds::CHORD_SUCCESSOR_RESPONSE, payload).await;
                true
            }
            kinds::CHORD_PREDECESSOR_REQUEST => {
                let payload = self.handle_predecessor_request().await;
                self.network.reply(&message, kinds::CHORD_PREDECESSOR_RESPONSE, payload).await;
                true
            }
            kinds::CHORD_NOTIFY => {
                let node = message.payload.get_str("Node").unwrap_or("").to_string();
                let chord_id = message.payload.get_int("ChordId").unwrap_or(0) as u32;
                self.handle_notify(&node, chord_id).await;
                true
            }
            _ => false,
        }
    }

    async fn handle_disconnection(&self, peer: &NodeId) {
        let mut state = self.state.write().await;
        if state.predecessor.as_ref().map(|p| &p.node) == Some(peer) {
            state.predecessor = None;
        }
        if state.successor.node == *peer {
            state.successor = self.self_node.clone();
        }
        for finger in state.fingers.iter_mut() {
            if finger.as_ref().map(|f| &f.node) == Some(peer) {
                *finger = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn between_normal_range_excludes_endpoints() {
        assert!(between(150, 100, 200));
        assert!(!between(100, 100, 200));
        assert!(!between(200, 100, 200));
        assert!(!between(50, 100, 200));
    }

    #[test]
    fn between_wraps_when_min_exceeds_max() {
        // Ring wraps past u32::MAX back to 0: (300, 0) wrapping around.
        assert!(between(350, 300, 50));
        assert!(between(10, 300, 50));
        assert!(!between(100, 300, 50));
        assert!(!between(300, 300, 50));
        assert!(!between(50, 300, 50));
    }
}
