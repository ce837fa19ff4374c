//! Chunk lookup table: the leader's key-range-to-owner map.
//!
//! Endpoints are matched exactly, never interpreted as an ordered range —
//! well-orderedness of `(start, end)` pairs is the caller's contract, not
//! this module's.

use crate::identity::NodeId;
use tokio::sync::RwLock;

/// One open endpoint of a chunk's key range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChunkMarker {
    Start,
    End,
    Value(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub start: ChunkMarker,
    pub end: ChunkMarker,
    pub owner: NodeId,
}

impl Chunk {
    pub fn new(start: ChunkMarker, end: ChunkMarker, owner: NodeId) -> Self {
        Self { start, end, owner }
    }

    fn endpoints_match(&self, start: &ChunkMarker, end: &ChunkMarker) -> bool {
        &self.start == start && &self.end == end
    }
}

/// The set of chunks, guarded by a single writer lock. No separate reader
/// API: callers snapshot and filter.
#[derive(Default)]
pub struct ChunkTable {
    chunks: RwLock<Vec<Chunk>>,
}

impl ChunkTable {
    pub fn new() -> Self {
        Self { chunks: RwLock::new(Vec::new()) }
    }

    pub async fn insert(&self, chunk: Chunk) {
        self.chunks.write().await.push(chunk);
    }

    pub async fn snapshot(&self) -> Vec<Chunk> {
        self.chunks.read().await.clone()
    }

    /// Replaces the chunk with endpoints exactly `(start, end)` by two
    /// chunks `(start, mid)` and `(mid, end)`, both owned by `new_owner`.
    /// No-op and `false` if no chunk has those exact endpoints.
    pub async fn split(&self, start: ChunkMarker, end: ChunkMarker, mid: ChunkMarker, new_owner: NodeId) -> bool {
        let mut chunks = self.chunks.write().await;
        let Some(pos) = chunks.iter().position(|c| c.endpoints_match(&start, &end)) else {
            return false;
        };
        chunks.remove(pos);
        chunks.push(Chunk::new(start, mid.clone(), new_owner.clone()));
        chunks.push(Chunk::new(mid, end, new_owner));
        true
    }

    /// Replaces two adjacent chunks `(start1, end1)` and `(start2, end2)`
    /// with a single chunk `(start1, end2)` owned by `new_owner`. No-op and
    /// `false` if either source chunk is missing.
    pub async fn join(
        &self,
        start1: ChunkMarker,
        end1: ChunkMarker,
        start2: ChunkMarker,
        end2: ChunkMarker,
        new_owner: NodeId,
    ) -> bool {
        let mut chunks = self.chunks.write().await;
        let Some(pos1) = chunks.iter().position(|c| c.endpoints_match(&start1, &end1)) else {
            return false;
        };
        let Some(pos2) = chunks.iter().position(|c| c.endpoints_match(&start2, &end2)) else {
            return false;
        };
        // Remove the higher index first so the other position stays valid.
        let (hi, lo) = if pos1 > pos2 { (pos1, pos2) } else { (pos2, pos1) };
        chunks.remove(hi);
        chunks.remove(lo);
        chunks.push(Chunk::new(start1, end2, new_owner));
        true
    }

    /// Replaces the owner of the chunk with endpoints exactly `(start,
    /// end)` in place. Returns whether a matching chunk was found.
    pub async fn update_owner(&self, start: ChunkMarker, end: ChunkMarker, new_owner: NodeId) -> bool {
        let mut chunks = self.chunks.write().await;
        match chunks.iter_mut().find(|c| c.endpoints_match(&start, &end)) {
            Some(chunk) => {
                chunk.owner = new_owner;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(port: u16) -> NodeId {
        NodeId::new("chunk-owner.example", port)
    }

    fn val(s: &str) -> ChunkMarker {
        ChunkMarker::Value(s.to_string())
    }

    #[tokio::test]
    async fn split_replaces_one_chunk_with_two() {
        let table = ChunkTable::new();
        table.insert(Chunk::new(ChunkMarker::Start, ChunkMarker::End, owner(1))).await;

        let ok = table.split(ChunkMarker::Start, ChunkMarker::End, val("m"), owner(2)).await;
        assert!(ok);

        let snapshot = table.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|c| c.start == ChunkMarker::Start && c.end == val("m") && c.owner == owner(2)));
        assert!(snapshot.iter().any(|c| c.start == val("m") && c.end == ChunkMarker::End && c.owner == owner(2)));
    }

    #[tokio::test]
    async fn split_on_missing_chunk_is_a_no_op() {
        let table = ChunkTable::new();
        let ok = table.split(ChunkMarker::Start, ChunkMarker::End, val("m"), owner(1)).await;
        assert!(!ok);
        assert!(table.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn join_is_the_left_inverse_of_split() {
        let table = ChunkTable::new();
        table.insert(Chunk::new(ChunkMarker::Start, ChunkMarker::End, owner(1))).await;
        table.split(ChunkMarker::Start, ChunkMarker::End, val("m"), owner(2)).await;

        let ok = table.join(ChunkMarker::Start, val("m"), val("m"), ChunkMarker::End, owner(3)).await;
        assert!(ok);

        let snapshot = table.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].start, ChunkMarker::Start);
        assert_eq!(snapshot[0].end, ChunkMarker::End);
        assert_eq!(snapshot[0].owner, owner(3));
    }

    #[tokio::test]
    async fn join_with_a_missing_side_is_a_no_op() {
        let table = ChunkTable::new();
        table.insert(Chunk::new(ChunkMarker::Start, val("m"), owner(1))).await;
        let ok = table.join(ChunkMarker::Start, val("m"), val("m"), ChunkMarker::End, owner(2)).await;
        assert!(!ok);
        assert_eq!(table.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn update_owner_replaces_in_place() {
        let table = ChunkTable::new();
        table.insert(Chunk::new(ChunkMarker::Start, ChunkMarker::End, owner(1))).await;
        let ok = table.update_owner(ChunkMarker::Start, ChunkMarker::End, owner(2)).await;
        assert!(ok);
        assert_eq!(table.snapshot().await[0].owner, owner(2));
    }

    #[tokio::test]
    async fn update_owner_on_missing_chunk_returns_false() {
        let table = ChunkTable::new();
        let ok = table.update_owner(ChunkMarker::Start, ChunkMarker::End, owner(1)).await;
        assert!(!ok);
    }
}
