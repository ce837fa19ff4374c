//! Reserved message kinds and their payload shapes.
//!
//! `Message::kind` is a plain string tag on the wire, not a closed Rust
//! enum — higher layers (election, chord) and future extensions are free
//! to introduce their own kinds. This module just names the ones the
//! core itself understands and builds/reads their payloads.

use crate::document::{Document, Value};

pub const JOIN_REQUEST: &str = "JoinRequest";
pub const JOIN_RESULT: &str = "JoinResult";
pub const HEARTBEAT: &str = "Heartbeat";
pub const INITIATE_LEADER_VOTE: &str = "InitiateLeaderVote";
pub const LEADER_VOTE_RESPONSE: &str = "LeaderVoteResponse";
pub const NEW_LEADER: &str = "NewLeader";
pub const LEADER_REQUEST: &str = "LeaderRequest";
pub const LEADER_RESPONSE: &str = "LeaderResponse";
pub const CHORD_SUCCESSOR_REQUEST: &str = "ChordSuccessorRequest";
pub const CHORD_SUCCESSOR_RESPONSE: &str = "ChordSuccessorResponse";
pub const CHORD_PREDECESSOR_REQUEST: &str = "ChordPredecessorRequest";
pub const CHORD_PREDECESSOR_RESPONSE: &str = "ChordPredecessorResponse";
pub const CHORD_NOTIFY: &str = "ChordNotify";

pub fn join_request_payload(advertised_address: &str) -> Document {
    Document::new().set("Address", advertised_address)
}

pub fn initiate_leader_vote_payload(current_term: i64) -> Document {
    Document::new().set("CurrentTerm", current_term)
}

pub fn leader_vote_response_yes() -> Document {
    Document::new().set("Vote", "Yes")
}

pub fn leader_vote_response_no(current_term: i64) -> Document {
    Document::new().set("Vote", "No").set("CurrentTerm", current_term)
}

pub fn new_leader_payload(leader: &str, current_term: i64) -> Document {
    Document::new().set("Leader", leader).set("CurrentTerm", current_term)
}

pub fn leader_response_payload(leader: &str, current_term: i64) -> Document {
    Document::new().set("Leader", leader).set("CurrentTerm", current_term)
}

pub fn chord_successor_response_payload(successor: &str, chord_id: u32) -> Document {
    Document::new().set("Successor", successor).set("ChordId", chord_id as i64)
}

pub fn chord_predecessor_response_payload(predecessor: &str, chord_id: u32) -> Document {
    Document::new().set("Predecessor", predecessor).set("ChordId", chord_id as i64)
}

pub fn chord_notify_payload(node: &str, chord_id: u32) -> Document {
    Document::new().set("Node", node).set("ChordId", chord_id as i64)
}

/// `"Yes"` / `"No"` reply from an `InitiateLeaderVote`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDecision {
    Yes,
    No,
}

pub fn parse_vote(payload: &Document) -> Option<(VoteDecision, Option<i64>)> {
    match payload.get("Vote") {
        Some(Value::String(s)) if s == "Yes" => Some((VoteDecision::Yes, None)),
        Some(Value::String(s)) if s == "No" => Some((VoteDecision::No, payload.get_int("CurrentTerm"))),
        _ => None,
    }
}

/// `LeaderResponse`/`NewLeader` payload: an empty `Leader` string means no
/// leader is known yet.
pub fn parse_leader_payload(payload: &Document) -> (Option<String>, i64) {
    let leader = payload.get_str("Leader").unwrap_or("");
    let leader = if leader.is_empty() { None } else { Some(leader.to_string()) };
    (leader, payload.get_int("CurrentTerm").unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_yes_has_no_term() {
        let doc = leader_vote_response_yes();
        assert_eq!(parse_vote(&doc), Some((VoteDecision::Yes, None)));
    }

    #[test]
    fn vote_no_carries_current_term() {
        let doc = leader_vote_response_no(7);
        assert_eq!(parse_vote(&doc), Some((VoteDecision::No, Some(7))));
    }
}
