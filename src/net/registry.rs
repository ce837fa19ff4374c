//! The dual incoming/outgoing connection registry.
//!
//! Two independently locked maps plus a "desired" set of peers this node
//! wants to keep an outgoing connection to. Invariant: at most one entry
//! per `(NodeId, Direction)` pair; a `Disconnected` entry is swept before
//! any new attempt on the same key is allowed to succeed.

use super::codec::{MessageCodec, RawFrame};
use super::connection::{Connection, ConnectionStatus};
use super::message::Direction;
use super::shutdown::{Running, RESPONSIVE_TICK};
use crate::error::CodecError;
use crate::identity::NodeId;
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

/// A frame that has finished decoding, tagged with where it came from.
#[derive(Debug)]
pub struct IncomingFrame {
    pub frame: RawFrame,
    pub peer: NodeId,
    pub direction: Direction,
}

const OUTBOUND_QUEUE_DEPTH: usize = 256;

pub struct Registry {
    local: NodeId,
    incoming: RwLock<HashMap<NodeId, Connection>>,
    outgoing: RwLock<HashMap<NodeId, Connection>>,
    desired: RwLock<HashSet<NodeId>>,
    inbound_tx: mpsc::Sender<IncomingFrame>,
}

impl Registry {
    pub fn new(local: NodeId, inbound_tx: mpsc::Sender<IncomingFrame>) -> Self {
        Self {
            local,
            incoming: RwLock::new(HashMap::new()),
            outgoing: RwLock::new(HashMap::new()),
            desired: RwLock::new(HashSet::new()),
            inbound_tx,
        }
    }

    /// Blocks accepting TCP clients; each accepted client is placed in
    /// `Incoming` keyed by its provisional `(ip, port)` address.
    pub async fn accept_loop(self: Arc<Self>, listener: TcpListener, running: Running) {
        loop {
            if !running.is_running() {
                break;
            }
            // Polling with a bounded timeout (rather than blocking forever
            // on `accept`) is how this loop observes shutdown within one
            // tick without needing to physically close the listener socket.
            match tokio::time::timeout(RESPONSIVE_TICK, listener.accept()).await {
                Ok(Ok((stream, remote))) => {
                    let provisional = NodeId::new(remote.ip().to_string(), remote.port());
                    self.clone().install(provisional, Direction::Incoming, stream, ConnectionStatus::Identifying).await;
                }
                Ok(Err(e)) => {
                    warn!("accept error: {e}");
                }
                Err(_timeout) => {
                    // Just a tick; loop around and re-check `running`.
                }
            }
        }
        info!("accept loop exiting");
    }

    /// Opens a TCP connection and inserts it into `Outgoing` with status
    /// `Identifying`. Idempotent if a live entry already exists.
    pub async fn open_outgoing(self: &Arc<Self>, target: NodeId) -> std::io::Result<()> {
        self.sweep_if_dead(Direction::Outgoing, &target).await;

        {
            let map = self.outgoing.read().await;
            if map.contains_key(&target) {
                return Ok(());
            }
        }

        let addr = format!("{}:{}", target.hostname(), target.port());
        let stream = TcpStream::connect(&addr).await?;
        self.clone().install(target, Direction::Outgoing, stream, ConnectionStatus::Identifying).await;
        Ok(())
    }

    async fn install(
        self: Arc<Self>,
        key: NodeId,
        direction: Direction,
        stream: TcpStream,
        initial_status: ConnectionStatus,
    ) {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let mut framed_reader = FramedRead::new(read_half, MessageCodec);
        let mut framed_writer = FramedWrite::new(write_half, MessageCodec);

        let (out_tx, mut out_rx) = mpsc::channel::<RawFrame>(OUTBOUND_QUEUE_DEPTH);
        let inbound_tx = self.inbound_tx.clone();
        let registry = self.clone();
        let reader_peer = key.clone();

        let reader_task = tokio::spawn(async move {
            loop {
                match framed_reader.next().await {
                    Some(Ok(frame)) => {
                        if inbound_tx
                            .send(IncomingFrame { frame, peer: reader_peer.clone(), direction })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Err(CodecError::Io(e))) => {
                        debug!("socket error reading from {reader_peer}: {e}");
                        break;
                    }
                    Some(Err(e)) => {
                        // A malformed/oversized frame is dropped silently;
                        // the connection stays up and the next frame is read.
                        debug!("malformed frame from {reader_peer}, dropping: {e}");
                    }
                    None => break,
                }
            }
            registry.mark_disconnected(direction, &reader_peer).await;
        });

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if framed_writer.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let connection = Connection::new(key.clone(), direction, initial_status, out_tx, reader_task, writer_task);

        match direction {
            Direction::Incoming => {
                self.incoming.write().await.insert(key, connection);
            }
            Direction::Outgoing => {
                self.outgoing.write().await.insert(key, connection);
            }
        }
    }

    /// During the join handshake the incoming side learns the peer's
    /// advertised address and re-keys the entry from the provisional one.
    pub async fn rename_incoming(&self, provisional: &NodeId, advertised: NodeId) {
        let mut map = self.incoming.write().await;
        if let Some(conn) = map.remove(provisional) {
            map.insert(advertised, conn);
        }
    }

    pub async fn mark_established(&self, direction: Direction, key: &NodeId) {
        let map = self.map_for(direction);
        let guard = map.read().await;
        if let Some(conn) = guard.get(key) {
            conn.mark_connected().await;
        }
    }

    /// Flags the entry `Disconnected` and sweeps it from the map,
    /// dropping its receive buffer with it.
    pub async fn mark_disconnected(&self, direction: Direction, key: &NodeId) {
        let map = self.map_for(direction);
        let removed = {
            let guard = map.read().await;
            if let Some(conn) = guard.get(key) {
                conn.mark_disconnected().await;
                true
            } else {
                false
            }
        };
        if removed {
            map.write().await.remove(key);
        }
    }

    async fn sweep_if_dead(&self, direction: Direction, key: &NodeId) {
        let map = self.map_for(direction);
        let dead = {
            let guard = map.read().await;
            match guard.get(key) {
                Some(conn) => conn.status().await == ConnectionStatus::Disconnected,
                None => false,
            }
        };
        if dead {
            map.write().await.remove(key);
        }
    }

    fn map_for(&self, direction: Direction) -> &RwLock<HashMap<NodeId, Connection>> {
        match direction {
            Direction::Incoming => &self.incoming,
            Direction::Outgoing => &self.outgoing,
        }
    }

    pub async fn get_status(&self, direction: Direction, key: &NodeId) -> Option<ConnectionStatus> {
        let guard = self.map_for(direction).read().await;
        match guard.get(key) {
            Some(conn) => Some(conn.status().await),
            None => None,
        }
    }

    pub async fn send_to(&self, direction: Direction, key: &NodeId, frame: RawFrame) -> bool {
        let guard = self.map_for(direction).read().await;
        match guard.get(key) {
            Some(conn) => conn.send_frame(frame).await,
            None => false,
        }
    }

    pub async fn connected_outgoing(&self) -> Vec<NodeId> {
        Self::connected_snapshot(&self.outgoing).await
    }

    pub async fn connected_incoming(&self) -> Vec<NodeId> {
        Self::connected_snapshot(&self.incoming).await
    }

    /// Union of connected peers across both directions, as the web status
    /// page and the election/chord layers need.
    pub async fn connected_nodes(&self) -> Vec<NodeId> {
        let mut nodes: HashSet<NodeId> = self.connected_outgoing().await.into_iter().collect();
        nodes.extend(self.connected_incoming().await);
        let mut nodes: Vec<NodeId> = nodes.into_iter().collect();
        nodes.sort();
        nodes
    }

    async fn connected_snapshot(map: &RwLock<HashMap<NodeId, Connection>>) -> Vec<NodeId> {
        let guard = map.read().await;
        let mut result = Vec::new();
        for (key, conn) in guard.iter() {
            if conn.status().await == ConnectionStatus::Connected {
                result.push(key.clone());
            }
        }
        result
    }

    pub async fn add_desired(&self, target: NodeId) {
        self.desired.write().await.insert(target);
    }

    pub async fn remove_desired(&self, target: &NodeId) {
        self.desired.write().await.remove(target);
    }

    /// Peers the maintenance loop should attempt an outgoing connection
    /// to: in the desired set, but absent from `Outgoing`.
    pub async fn undesired_gaps(&self) -> Vec<NodeId> {
        let desired = self.desired.read().await;
        let outgoing = self.outgoing.read().await;
        desired
            .iter()
            .filter(|id| !outgoing.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn local(&self) -> &NodeId {
        &self.local
    }

    /// Every registered entry regardless of status, tagged with its
    /// direction — heartbeats go out on both directions as soon as a
    /// connection exists, not just once it reaches `Connected`.
    pub async fn all_connections(&self) -> Vec<(NodeId, Direction)> {
        let mut result: Vec<(NodeId, Direction)> = self
            .incoming
            .read()
            .await
            .keys()
            .cloned()
            .map(|k| (k, Direction::Incoming))
            .collect();
        result.extend(
            self.outgoing
                .read()
                .await
                .keys()
                .cloned()
                .map(|k| (k, Direction::Outgoing)),
        );
        result
    }
}
