//! A single registry entry: one TCP peer, one direction.

use super::codec::RawFrame;
use super::message::Direction;
use crate::identity::NodeId;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// `Identifying -> Connected` on a successful handshake; any terminal
/// failure goes to `Disconnected`, which is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Identifying,
    Connected,
    Disconnected,
}

/// A registry entry. The actual socket is owned by a reader task and a
/// writer task spawned when the connection is created; this handle only
/// keeps what's needed to send frames and to tear the tasks (and their
/// buffers) down on disconnection — an event loop built from cooperative
/// tokio tasks rather than a single thread per connection.
pub struct Connection {
    pub peer: NodeId,
    pub direction: Direction,
    status: Arc<RwLock<ConnectionStatus>>,
    outbound: mpsc::Sender<RawFrame>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Connection {
    pub fn new(
        peer: NodeId,
        direction: Direction,
        initial_status: ConnectionStatus,
        outbound: mpsc::Sender<RawFrame>,
        reader_task: JoinHandle<()>,
        writer_task: JoinHandle<()>,
    ) -> Self {
        Self {
            peer,
            direction,
            status: Arc::new(RwLock::new(initial_status)),
            outbound,
            reader_task,
            writer_task,
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    pub async fn mark_connected(&self) {
        *self.status.write().await = ConnectionStatus::Connected;
    }

    pub async fn mark_disconnected(&self) {
        *self.status.write().await = ConnectionStatus::Disconnected;
    }

    pub async fn is_connected(&self) -> bool {
        self.status().await == ConnectionStatus::Connected
    }

    /// Hand a frame to this connection's writer task. Returns `false` if
    /// the writer has already gone away.
    pub async fn send_frame(&self, frame: RawFrame) -> bool {
        self.outbound.send(frame).await.is_ok()
    }

    pub fn status_handle(&self) -> Arc<RwLock<ConnectionStatus>> {
        self.status.clone()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Tearing the tasks down drops the reader's internal frame buffer
        // with it — there is no separate buffer to sweep by hand.
        self.reader_task.abort();
        self.writer_task.abort();
    }
}
