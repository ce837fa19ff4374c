//! Term-based majority-vote leader election.
//!
//! One `Election` per node. Controller nodes run the candidacy maintenance
//! loop and answer `InitiateLeaderVote`; every node (controller or not)
//! tracks `NewLeader` broadcasts and answers `LeaderRequest`, so a plain
//! database node can still discover the current leader.

use crate::net::kinds::{self, VoteDecision};
use crate::net::{Direction, Message, MessageHandler, Network};
use crate::identity::NodeId;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::info;

use crate::net::shutdown::{responsive_sleep, Running};

/// Base of the randomized back-off window: `random(k, k*N)` seconds.
const BACKOFF_BASE_SECS: u64 = 5;

/// Strict majority of `n` configured controllers: `floor(n/2) + 1`.
fn majority_for(n: usize) -> usize {
    n.max(1) / 2 + 1
}

/// The `[k, k*n)` back-off window in seconds.
fn backoff_window(n: usize) -> (u64, u64) {
    let n = n.max(1) as u64;
    let span = BACKOFF_BASE_SECS.saturating_mul(n).max(BACKOFF_BASE_SECS + 1);
    (BACKOFF_BASE_SECS, span)
}

struct ElectionState {
    current_term: i64,
    voted_this_term: bool,
    leader: Option<NodeId>,
    is_leader: bool,
    next_candidate_at: Instant,
}

pub struct Election {
    network: Arc<Network>,
    controllers: Vec<NodeId>,
    is_controller: bool,
    state: RwLock<ElectionState>,
    running: Running,
}

impl Election {
    /// `controllers` is the full configured controller set, local address
    /// included. `is_controller` gates whether this node runs candidacy
    /// and answers votes, versus only tracking `leader`/`currentTerm`
    /// passively as a database node.
    pub fn new(network: Arc<Network>, controllers: Vec<NodeId>, is_controller: bool) -> Arc<Self> {
        Arc::new(Self {
            network,
            controllers,
            is_controller,
            state: RwLock::new(ElectionState {
                current_term: 0,
                voted_this_term: false,
                leader: None,
                is_leader: false,
                next_candidate_at: Instant::now(),
            }),
            running: Running::new(),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let election = self.clone();
        if self.is_controller {
            tokio::spawn(async move { election.maintenance_loop().await });
        } else {
            tokio::spawn(async move { election.discovery_loop().await });
        }
    }

    pub fn shutdown(&self) {
        self.running.stop();
    }

    pub async fn leader(&self) -> Option<NodeId> {
        self.state.read().await.leader.clone()
    }

    pub async fn is_leader(&self) -> bool {
        self.state.read().await.is_leader
    }

    pub async fn current_term(&self) -> i64 {
        self.state.read().await.current_term
    }

    fn controller_count(&self) -> usize {
        self.controllers.len().max(1)
    }

    fn majority(&self) -> usize {
        majority_for(self.controller_count())
    }

    fn other_controllers(&self) -> Vec<NodeId> {
        let local = self.network.local();
        self.controllers.iter().filter(|c| *c != local).cloned().collect()
    }

    async fn maintenance_loop(self: Arc<Self>) {
        while responsive_sleep(Duration::from_secs(1), &self.running).await {
            let should_run = {
                let state = self.state.read().await;
                state.leader.is_none() && Instant::now() >= state.next_candidate_at
            };
            if should_run {
                self.initiate_vote().await;
            }
        }
        info!("election maintenance loop exiting");
    }

    /// A database (non-controller) node never votes; it just polls a
    /// configured controller for the current leader until `NewLeader`
    /// broadcasts keep it up to date on their own.
    async fn discovery_loop(self: Arc<Self>) {
        while responsive_sleep(Duration::from_secs(5), &self.running).await {
            let known = self.state.read().await.leader.is_some();
            if !known {
                self.request_leader().await;
            }
        }
        info!("election discovery loop exiting");
    }

    async fn request_leader(&self) {
        for peer in &self.controllers {
            let reply = self
                .network
                .request(kinds::LEADER_REQUEST, crate::document::Document::new(), peer.clone(), Direction::Outgoing)
                .await;
            if !reply.status().await.is_success() {
                continue;
            }
            let Some(response) = reply.response().await else { continue };
            let (leader, term) = kinds::parse_leader_payload(&response.payload);
            if leader.is_some() {
                let mut state = self.state.write().await;
                state.leader = leader;
                state.current_term = term;
                return;
            }
        }
    }

    async fn reset_backoff(&self) {
        let (low, high) = backoff_window(self.controller_count());
        let delay = rand::thread_rng().gen_range(low..high);
        self.state.write().await.next_candidate_at = Instant::now() + Duration::from_secs(delay);
    }

    /// Runs one candidacy attempt to completion: bumps the term, polls
    /// every other configured controller, and either becomes leader or
    /// resets the back-off.
    async fn initiate_vote(self: &Arc<Self>) {
        let term_at_attempt = {
            let mut state = self.state.write().await;
            state.current_term += 1;
            state.voted_this_term = true;
            state.current_term
        };

        let others = self.other_controllers();
        let replies = futures::future::join_all(others.into_iter().map(|peer| {
            let network = self.network.clone();
            async move {
                network
                    .request(
                        kinds::INITIATE_LEADER_VOTE,
                        kinds::initiate_leader_vote_payload(term_at_attempt),
                        peer,
                        Direction::Outgoing,
                    )
                    .await
            }
        }))
        .await;

        let mut yes_votes = 1usize; // self-vote
        let mut newer_term: Option<i64> = None;

        for reply in replies {
            if !reply.status().await.is_success() {
                continue;
            }
            let Some(response) = reply.response().await else { continue };
            match kinds::parse_vote(&response.payload) {
                Some((VoteDecision::Yes, _)) => yes_votes += 1,
                Some((VoteDecision::No, Some(t))) if t > term_at_attempt => {
                    newer_term = Some(newer_term.map_or(t, |n| n.max(t)));
                }
                _ => {}
            }
        }

        if let Some(t) = newer_term {
            let mut state = self.state.write().await;
            if t > state.current_term {
                state.current_term = t;
            }
            state.voted_this_term = false;
            drop(state);
            self.reset_backoff().await;
            return;
        }

        let became_leader = {
            let state = self.state.read().await;
            state.current_term == term_at_attempt && yes_votes >= self.majority()
        };

        if became_leader {
            {
                let mut state = self.state.write().await;
                state.leader = Some(self.network.local().clone());
                state.is_leader = true;
            }
            let leader_name = self.network.local().to_string();
            self.broadcast_new_leader(term_at_attempt, &leader_name).await;
        } else {
            self.reset_backoff().await;
        }
    }

    async fn broadcast_new_leader(&self, term: i64, leader_name: &str) {
        let payload = kinds::new_leader_payload(leader_name, term);
        for (peer, direction) in self.network.connected_peers().await {
            self.network.notify(kinds::NEW_LEADER, payload.clone(), peer, direction).await;
        }
    }

    async fn handle_vote_request(&self, term: i64) -> crate::document::Document {
        let mut state = self.state.write().await;
        if term > state.current_term || (term == state.current_term && !state.voted_this_term) {
            state.current_term = term;
            state.voted_this_term = true;
            kinds::leader_vote_response_yes()
        } else {
            kinds::leader_vote_response_no(state.current_term)
        }
    }

    async fn handle_new_leader(&self, leader: &str, term: i64) {
        let mut state = self.state.write().await;
        if leader.is_empty() {
            state.leader = None;
            state.is_leader = false;
        } else if term == state.current_term {
            if let Ok(node) = NodeId::parse(leader) {
                state.leader = Some(node);
                state.is_leader = false;
            }
        }
    }

    async fn handle_leader_request(&self) -> crate::document::Document {
        let state = self.state.read().await;
        let name = state.leader.as_ref().map(|n| n.to_string()).unwrap_or_default();
        kinds::leader_response_payload(&name, state.current_term)
    }

    async fn connected_controller_count(&self) -> usize {
        let connected: HashSet<NodeId> = self.network.connected_nodes().await.into_iter().collect();
        self.other_controllers().into_iter().filter(|c| connected.contains(c)).count()
    }

    async fn step_down(&self) {
        let term = {
            let mut state = self.state.write().await;
            state.leader = None;
            state.is_leader = false;
            state.current_term
        };
        self.reset_backoff().await;
        self.broadcast_new_leader(term, "").await;
    }
}

#[async_trait]
impl MessageHandler for Election {
    async fn handle_message(&self, message: Message) -> bool {
        match message.kind.as_str() {
            kinds::INITIATE_LEADER_VOTE => {
                if !self.is_controller {
                    return true; // non-controllers never answer a vote request
                }
                let term = message.payload.get_int("CurrentTerm").unwrap_or(0);
                let reply_payload = self.handle_vote_request(term).await;
                self.network.reply(&message, kinds::LEADER_VOTE_RESPONSE, reply_payload).await;
                true
            }
            kinds::NEW_LEADER => {
                let leader = message.payload.get_str("Leader").unwrap_or("").to_string();
                let term = message.payload.get_int("CurrentTerm").unwrap_or(0);
                self.handle_new_leader(&leader, term).await;
                true
            }
            kinds::LEADER_REQUEST => {
                let reply_payload = self.handle_leader_request().await;
                self.network.reply(&message, kinds::LEADER_RESPONSE, reply_payload).await;
                true
            }
            _ => false,
        }
    }

    async fn handle_disconnection(&self, peer: &NodeId) {
        let (was_leader_peer, is_leader) = {
            let state = self.state.read().await;
            (state.leader.as_ref() == Some(peer), state.is_leader)
        };

        if was_leader_peer {
            self.state.write().await.leader = None;
            self.reset_backoff().await;
            return;
        }

        if is_leader && self.is_controller {
            let connected = self.connected_controller_count().await;
            if connected < self.controller_count() / 2 {
                self.step_down().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_is_strict_half_plus_one() {
        assert_eq!(majority_for(3), 2);
        assert_eq!(majority_for(5), 3);
        assert_eq!(majority_for(1), 1);
    }

    #[test]
    fn even_controller_count_keeps_the_strict_less_than_half_step_down_quirk() {
        // An even N lets the leader continue at exactly N/2 connected
        // controllers, not <= N/2.
        assert_eq!(4 / 2, 2);
        assert!(!(2 < 4 / 2));
    }

    #[test]
    fn backoff_window_scales_with_controller_count() {
        let (low, high) = backoff_window(5);
        assert_eq!(low, BACKOFF_BASE_SECS);
        assert_eq!(high, BACKOFF_BASE_SECS * 5);
    }

    #[test]
    fn backoff_window_is_never_empty_for_a_single_controller() {
        let (low, high) = backoff_window(1);
        assert!(low < high);
    }
}
