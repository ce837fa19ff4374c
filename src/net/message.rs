//! The `Message` record and its status lifecycle.
//!
//! `Message` is conceptually immutable (its `kind`/`payload`/`address`
//! never change after construction) but carries a small piece of shared,
//! mutable runtime state — `status`, `response`, `expire_at`, and an
//! optional one-shot `on_response` callback — so that the caller's handle
//! and the engine's waiter-table entry observe the same transitions.

use crate::document::Document;
use crate::identity::NodeId;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Message status lifecycle:
/// `Created -> Sending -> (Sent | SendingFailure)`, and if
/// `waiting_for_response`, `Sent -> WaitingForResponse ->
/// (ResponseReceived | ResponseFailure | ResponseTimeout)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Created,
    Sending,
    Sent,
    SendingFailure,
    WaitingForResponse,
    ResponseReceived,
    ResponseFailure,
    ResponseTimeout,
}

impl Status {
    /// A message is done once it has left `Sending`/`WaitingForResponse`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Sending | Status::WaitingForResponse)
    }

    /// Success iff the final status is `Sent` or `ResponseReceived`.
    pub fn is_success(self) -> bool {
        matches!(self, Status::Sent | Status::ResponseReceived)
    }
}

pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(60);

/// Monotonic per-sender id generator. Skips zero on wrap: no `Message` is
/// ever assigned id `0`, since `0` doubles as "no reply".
#[derive(Debug)]
pub struct IdGenerator(AtomicU32);

impl IdGenerator {
    pub fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    pub fn next(&self) -> u32 {
        let id = self.0.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            self.0.fetch_add(1, Ordering::Relaxed)
        } else {
            id
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

type ResponseCallback = Box<dyn FnOnce(Message) + Send + 'static>;

struct Inner {
    status: RwLock<Status>,
    response: RwLock<Option<Box<Message>>>,
    expire_at: RwLock<Instant>,
    on_response: AsyncMutex<Option<ResponseCallback>>,
}

/// A message in flight (or already resolved). Cloning shares the same
/// runtime state — a cheap handle, not a deep copy.
#[derive(Clone)]
pub struct Message {
    pub id: u32,
    pub in_response_to: u32,
    pub waiting_for_response: bool,
    pub kind: String,
    pub payload: Document,
    pub address: NodeId,
    pub direction: Direction,
    pub require_secure_connection: bool,
    inner: Arc<Inner>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("in_response_to", &self.in_response_to)
            .field("waiting_for_response", &self.waiting_for_response)
            .field("kind", &self.kind)
            .field("address", &self.address)
            .field("direction", &self.direction)
            .finish()
    }
}

impl Message {
    pub fn new(
        id: u32,
        kind: impl Into<String>,
        payload: Document,
        address: NodeId,
        direction: Direction,
    ) -> Self {
        Self {
            id,
            in_response_to: 0,
            waiting_for_response: false,
            kind: kind.into(),
            payload,
            address,
            direction,
            require_secure_connection: true,
            inner: Arc::new(Inner {
                status: RwLock::new(Status::Created),
                response: RwLock::new(None),
                expire_at: RwLock::new(Instant::now() + DEFAULT_EXPIRY),
                on_response: AsyncMutex::new(None),
            }),
        }
    }

    pub fn waiting_for_response(mut self, wait: bool) -> Self {
        self.waiting_for_response = wait;
        self
    }

    pub fn not_requiring_secure_connection(mut self) -> Self {
        self.require_secure_connection = false;
        self
    }

    pub fn in_response_to(mut self, request_id: u32) -> Self {
        self.in_response_to = request_id;
        self
    }

    pub fn with_expiry(self, expiry: Duration) -> Self {
        // Safe to assume uncontended: this only ever runs right after
        // `Message::new` on a freshly built, not-yet-shared `Arc`.
        if let Ok(mut guard) = self.inner.expire_at.try_write() {
            *guard = Instant::now() + expiry;
        }
        self
    }

    pub fn on_response<F>(self, callback: F) -> Self
    where
        F: FnOnce(Message) + Send + 'static,
    {
        if let Ok(mut guard) = self.inner.on_response.try_lock() {
            *guard = Some(Box::new(callback));
        }
        self
    }

    pub async fn status(&self) -> Status {
        *self.inner.status.read().await
    }

    pub async fn set_status(&self, status: Status) {
        *self.inner.status.write().await = status;
    }

    pub async fn is_expired(&self) -> bool {
        Instant::now() >= *self.inner.expire_at.read().await
    }

    pub async fn response(&self) -> Option<Message> {
        self.inner.response.read().await.as_ref().map(|m| (**m).clone())
    }

    /// Record the reply and fire the `on_response` callback exactly once,
    /// on a dedicated task.
    pub async fn resolve(&self, reply: Message) {
        *self.inner.response.write().await = Some(Box::new(reply.clone()));
        *self.inner.status.write().await = Status::ResponseReceived;
        let callback = self.inner.on_response.lock().await.take();
        if let Some(callback) = callback {
            tokio::spawn(async move {
                callback(reply);
            });
        }
    }

    /// Spin with a small sleep until the message leaves `Sending` /
    /// `WaitingForResponse`.
    pub async fn block_until_done(&self) -> Status {
        loop {
            let status = self.status().await;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> NodeId {
        NodeId::new("peer.example", 5000)
    }

    #[test]
    fn id_generator_skips_zero_on_wrap() {
        let gen = IdGenerator(AtomicU32::new(u32::MAX));
        let first = gen.next(); // wraps internal counter to 0
        assert_eq!(first, u32::MAX);
        let second = gen.next();
        assert_ne!(second, 0);
    }

    #[test]
    fn ids_are_unique_for_many_calls() {
        let gen = IdGenerator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(gen.next()));
        }
    }

    #[tokio::test]
    async fn resolve_delivers_response_and_sets_status_once() {
        let msg = Message::new(1, "LeaderRequest", Document::new(), addr(), Direction::Outgoing)
            .waiting_for_response(true);
        msg.set_status(Status::WaitingForResponse).await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        let msg2 = msg.clone().on_response(move |reply| {
            let _ = tx.send(reply.kind.clone());
        });

        let reply = Message::new(2, "LeaderResponse", Document::new(), addr(), Direction::Outgoing)
            .in_response_to(1);
        msg2.resolve(reply).await;

        assert_eq!(msg.status().await, Status::ResponseReceived);
        assert_eq!(rx.await.unwrap(), "LeaderResponse");
    }

    #[tokio::test]
    async fn block_until_done_waits_for_terminal_status() {
        let msg = Message::new(1, "Heartbeat", Document::new(), addr(), Direction::Outgoing);
        msg.set_status(Status::Sending).await;
        let handle = msg.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.set_status(Status::Sent).await;
        });
        let status = msg.block_until_done().await;
        assert_eq!(status, Status::Sent);
    }

    #[test]
    fn success_iff_sent_or_response_received() {
        assert!(Status::Sent.is_success());
        assert!(Status::ResponseReceived.is_success());
        assert!(!Status::SendingFailure.is_success());
        assert!(!Status::ResponseTimeout.is_success());
        assert!(!Status::ResponseFailure.is_success());
    }
}
