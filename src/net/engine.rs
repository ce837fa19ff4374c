//! The network engine: wires the registry, the waiter table, and a
//! subscriber list together into `Send` / dispatch / maintenance / heartbeat
//! loops.

use super::codec::RawFrame;
use super::connection::ConnectionStatus;
use super::kinds;
use super::message::{Direction, IdGenerator, Message, Status};
use super::registry::{IncomingFrame, Registry};
use super::shutdown::{responsive_sleep, Running};
use crate::document::Document;
use crate::identity::NodeId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A node joined or dropped off the registry, consumed by the status page
/// and by election/chord for their own membership tracking.
#[derive(Debug, Clone)]
pub enum NetEvent {
    Connected(NodeId, Direction),
    Disconnected(NodeId),
}

/// Implemented by anything that wants a crack at an incoming message that
/// isn't a reply to one of its own requests and isn't the `JoinRequest`
/// handshake (which the engine handles itself). The first handler to
/// return `true` stops the chain.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, message: Message) -> bool;

    async fn handle_disconnection(&self, _peer: &NodeId) {}
}

#[derive(Clone)]
pub struct NetConfig {
    pub local: NodeId,
    pub maintenance_interval: Duration,
    pub heartbeat_interval: Duration,
    pub send_concurrency: usize,
}

impl NetConfig {
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            maintenance_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            send_concurrency: 64,
        }
    }
}

/// The running network: one per node. Cheap to clone (it's an `Arc`
/// handle everywhere it's passed around).
pub struct Network {
    config: NetConfig,
    registry: Arc<Registry>,
    id_gen: IdGenerator,
    waiters: RwLock<HashMap<u32, Message>>,
    subscribers: RwLock<Vec<Arc<dyn MessageHandler>>>,
    events_tx: broadcast::Sender<NetEvent>,
    running: Running,
    send_permits: Arc<Semaphore>,
}

impl Network {
    /// Binds the listening socket and spawns the accept, dispatch,
    /// maintenance, and heartbeat tasks. Returns a handle shared by every
    /// caller and background task alike.
    pub async fn start(config: NetConfig) -> std::io::Result<Arc<Network>> {
        let (inbound_tx, inbound_rx) = mpsc::channel(1024);
        let registry = Arc::new(Registry::new(config.local.clone(), inbound_tx));
        let (events_tx, _) = broadcast::channel(256);
        let running = Running::new();

        let network = Arc::new(Network {
            send_permits: Arc::new(Semaphore::new(config.send_concurrency)),
            config,
            registry: registry.clone(),
            id_gen: IdGenerator::new(),
            waiters: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            events_tx,
            running,
        });

        let listener = TcpListener::bind(("0.0.0.0", network.config.local.port())).await?;
        info!("listening on {}", network.config.local);

        let reg = registry.clone();
        let run_flag = network.running.clone();
        tokio::spawn(async move { reg.accept_loop(listener, run_flag).await });

        let net = network.clone();
        tokio::spawn(async move { net.run_dispatch_loop(inbound_rx).await });

        let net = network.clone();
        tokio::spawn(async move { net.maintenance_loop().await });

        let net = network.clone();
        tokio::spawn(async move { net.heartbeat_loop().await });

        Ok(network)
    }

    /// Stops the accept/dispatch/maintenance/heartbeat loops within one
    /// `RESPONSIVE_TICK`. Open connections are left to `Drop` as callers
    /// release their `Arc<Network>`.
    pub fn shutdown(&self) {
        self.running.stop();
    }

    pub fn local(&self) -> &NodeId {
        self.registry.local()
    }

    pub async fn register_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.subscribers.write().await.push(handler);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<NetEvent> {
        self.events_tx.subscribe()
    }

    pub async fn connected_nodes(&self) -> Vec<NodeId> {
        self.registry.connected_nodes().await
    }

    /// Adds `target` to the desired outgoing set and attempts the join
    /// handshake once; the maintenance loop retries it on a gap.
    pub fn connect(self: &Arc<Self>, target: NodeId) {
        let net = self.clone();
        tokio::spawn(async move {
            net.registry.add_desired(target.clone()).await;
            net.join(target).await;
        });
    }

    pub async fn disconnect(&self, target: &NodeId) {
        self.registry.remove_desired(target).await;
        self.registry.mark_disconnected(Direction::Outgoing, target).await;
    }

    /// Opens an outgoing TCP connection (if not already open) and runs the
    /// `JoinRequest` / `JoinResult` handshake against it.
    pub async fn join(self: &Arc<Self>, target: NodeId) -> bool {
        if let Err(e) = self.registry.open_outgoing(target.clone()).await {
            debug!("could not open outgoing connection to {target}: {e}");
            return false;
        }

        let request = Message::new(
            self.id_gen.next(),
            kinds::JOIN_REQUEST,
            kinds::join_request_payload(&self.config.local.to_string()),
            target.clone(),
            Direction::Outgoing,
        )
        .waiting_for_response(true)
        .not_requiring_secure_connection();

        let handle = request.clone();
        self.send(request).await;
        let status = handle.block_until_done().await;

        if status.is_success() {
            self.registry.mark_established(Direction::Outgoing, &target).await;
            let _ = self.events_tx.send(NetEvent::Connected(target, Direction::Outgoing));
            true
        } else {
            warn!("join handshake with {target} ended in {status:?}");
            false
        }
    }

    /// Hands `message` off for sending. Registers the waiter *before*
    /// dispatching to the send worker so a reply can never race ahead of
    /// its own waiter entry.
    pub async fn send(self: &Arc<Self>, message: Message) {
        message.set_status(Status::Sending).await;
        if message.waiting_for_response {
            self.waiters.write().await.insert(message.id, message.clone());
        }

        let net = self.clone();
        let Ok(permit) = self.send_permits.clone().acquire_owned().await else {
            return;
        };
        tokio::spawn(async move {
            net.perform_send(message).await;
            drop(permit);
        });
    }

    async fn perform_send(self: Arc<Self>, message: Message) {
        if message.direction == Direction::Outgoing
            && message.require_secure_connection
            && self.registry.get_status(Direction::Outgoing, &message.address).await
                != Some(ConnectionStatus::Connected)
        {
            self.fail_send(&message).await;
            return;
        }

        let frame = RawFrame {
            id: message.id,
            in_response_to: message.in_response_to,
            waiting_for_response: message.waiting_for_response,
            kind: message.kind.clone().into_bytes(),
            payload: message.payload.to_canonical_json().into_bytes(),
        };

        let delivered = self.registry.send_to(message.direction, &message.address, frame).await;
        if delivered {
            let status = if message.waiting_for_response {
                Status::WaitingForResponse
            } else {
                Status::Sent
            };
            message.set_status(status).await;
        } else {
            self.fail_send(&message).await;
            self.mark_disconnected_and_notify(message.direction, &message.address).await;
        }
    }

    async fn fail_send(&self, message: &Message) {
        message.set_status(Status::SendingFailure).await;
        if message.waiting_for_response {
            self.waiters.write().await.remove(&message.id);
        }
    }

    async fn mark_disconnected_and_notify(self: &Arc<Self>, direction: Direction, peer: &NodeId) {
        self.registry.mark_disconnected(direction, peer).await;

        let stale: Vec<u32> = {
            let waiters = self.waiters.read().await;
            waiters
                .iter()
                .filter(|(_, m)| &m.address == peer)
                .map(|(id, _)| *id)
                .collect()
        };
        if !stale.is_empty() {
            let mut waiters = self.waiters.write().await;
            for id in stale {
                if let Some(m) = waiters.remove(&id) {
                    m.set_status(Status::ResponseFailure).await;
                }
            }
        }

        for handler in self.subscribers.read().await.iter() {
            handler.handle_disconnection(peer).await;
        }
        let _ = self.events_tx.send(NetEvent::Disconnected(peer.clone()));
    }

    async fn run_dispatch_loop(self: Arc<Self>, mut rx: mpsc::Receiver<IncomingFrame>) {
        while let Some(incoming) = rx.recv().await {
            let net = self.clone();
            tokio::spawn(async move { net.handle_incoming_frame(incoming).await });
        }
    }

    /// Routes an incoming frame: a reply resolves its waiter; a
    /// `JoinRequest` re-keys the incoming entry and replies; anything else
    /// goes to the subscriber chain.
    async fn handle_incoming_frame(self: Arc<Self>, incoming: IncomingFrame) {
        let kind = match String::from_utf8(incoming.frame.kind.clone()) {
            Ok(k) => k,
            Err(_) => {
                debug!("non-utf8 kind from {}, dropping frame", incoming.peer);
                return;
            }
        };
        let payload_str = match String::from_utf8(incoming.frame.payload.clone()) {
            Ok(p) => p,
            Err(_) => {
                debug!("non-utf8 payload from {}, dropping frame", incoming.peer);
                return;
            }
        };
        let payload = match Document::from_json(&payload_str) {
            Ok(d) => d,
            Err(e) => {
                debug!("malformed JSON payload from {}: {e}", incoming.peer);
                return;
            }
        };

        if incoming.frame.in_response_to != 0 {
            let waiter = self.waiters.write().await.remove(&incoming.frame.in_response_to);
            if let Some(waiter) = waiter {
                let reply = Message::new(incoming.frame.id, kind, payload, incoming.peer.clone(), incoming.direction)
                    .in_response_to(incoming.frame.in_response_to);
                waiter.resolve(reply).await;
            }
            return;
        }

        if kind == kinds::JOIN_REQUEST {
            self.handle_join_request(incoming, payload).await;
            return;
        }

        let message = Message::new(incoming.frame.id, kind, payload, incoming.peer.clone(), incoming.direction);
        self.dispatch_to_handlers(message).await;
    }

    async fn handle_join_request(self: &Arc<Self>, incoming: IncomingFrame, payload: Document) {
        let Some(advertised_str) = payload.get_str("Address") else {
            debug!("JoinRequest from {} missing Address", incoming.peer);
            return;
        };
        let Ok(advertised) = NodeId::parse(advertised_str) else {
            debug!("JoinRequest from {} has unparsable Address {advertised_str}", incoming.peer);
            return;
        };

        self.registry.rename_incoming(&incoming.peer, advertised.clone()).await;
        self.registry.mark_established(Direction::Incoming, &advertised).await;

        let request = Message::new(incoming.frame.id, kinds::JOIN_REQUEST, Document::new(), advertised.clone(), Direction::Incoming);
        self.reply(&request, kinds::JOIN_RESULT, Document::new()).await;

        let _ = self.events_tx.send(NetEvent::Connected(advertised, Direction::Incoming));
    }

    async fn dispatch_to_handlers(&self, message: Message) {
        let handlers = self.subscribers.read().await;
        for handler in handlers.iter() {
            if handler.handle_message(message.clone()).await {
                return;
            }
        }
        debug!("no handler consumed {} from {}", message.kind, message.address);
    }

    async fn maintenance_loop(self: Arc<Self>) {
        while responsive_sleep(self.config.maintenance_interval, &self.running).await {
            self.expire_waiters().await;
            self.reconnect_desired_gaps().await;
        }
        info!("maintenance loop exiting");
    }

    async fn expire_waiters(&self) {
        let snapshot: Vec<(u32, Message)> = {
            let waiters = self.waiters.read().await;
            waiters.iter().map(|(id, m)| (*id, m.clone())).collect()
        };

        let mut expired = Vec::new();
        for (id, message) in snapshot {
            if message.is_expired().await {
                message.set_status(Status::ResponseTimeout).await;
                expired.push(id);
            }
        }

        if !expired.is_empty() {
            let mut waiters = self.waiters.write().await;
            for id in expired {
                waiters.remove(&id);
            }
        }
    }

    async fn reconnect_desired_gaps(self: &Arc<Self>) {
        for target in self.registry.undesired_gaps().await {
            let net = self.clone();
            tokio::spawn(async move {
                net.join(target).await;
            });
        }
    }

    /// Builds a request, sends it, and blocks until it resolves — the
    /// common "ask a peer a question and wait" shape the election and
    /// chord layers build their own request kinds on top of.
    pub async fn request(
        self: &Arc<Self>,
        kind: impl Into<String>,
        payload: Document,
        address: NodeId,
        direction: Direction,
    ) -> Message {
        let message = Message::new(self.id_gen.next(), kind, payload, address, direction).waiting_for_response(true);
        let handle = message.clone();
        self.send(message).await;
        handle.block_until_done().await;
        handle
    }

    /// Fire-and-forget one-way message; no waiter is registered.
    pub async fn notify(self: &Arc<Self>, kind: impl Into<String>, payload: Document, address: NodeId, direction: Direction) {
        let message = Message::new(self.id_gen.next(), kind, payload, address, direction);
        self.send(message).await;
    }

    /// Replies to `request` with a fresh message carrying `inResponseTo =
    /// request.id`, addressed back to whoever sent it.
    pub async fn reply(self: &Arc<Self>, request: &Message, kind: impl Into<String>, payload: Document) {
        let message = Message::new(self.id_gen.next(), kind, payload, request.address.clone(), request.direction)
            .in_response_to(request.id);
        self.send(message).await;
    }

    /// Every connected peer tagged with the direction holding that
    /// connection — what a broadcast (`NewLeader`) needs.
    pub async fn connected_peers(&self) -> Vec<(NodeId, Direction)> {
        let mut result: Vec<(NodeId, Direction)> = self
            .registry
            .connected_outgoing()
            .await
            .into_iter()
            .map(|n| (n, Direction::Outgoing))
            .collect();
        result.extend(self.registry.connected_incoming().await.into_iter().map(|n| (n, Direction::Incoming)));
        result
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        while responsive_sleep(self.config.heartbeat_interval, &self.running).await {
            for (peer, direction) in self.registry.all_connections().await {
                let heartbeat = Message::new(self.id_gen.next(), kinds::HEARTBEAT, Document::new(), peer, direction)
                    .not_requiring_secure_connection();
                self.send(heartbeat).await;
            }
        }
        info!("heartbeat loop exiting");
    }
}
