//! A peer-to-peer clustered database runtime: gossiped membership over a
//! framed TCP transport, term-based leader election among controller
//! nodes, and an optional Chord ring topology.

pub mod chord;
pub mod chunk;
pub mod config;
pub mod document;
pub mod election;
pub mod error;
pub mod http;
pub mod identity;
pub mod net;

use config::NodeConfig;
use identity::NodeId;
use net::{NetConfig, Network};
use std::sync::Arc;
use tracing::info;

/// A running node: the network engine plus whichever higher layers this
/// process is configured to run. Composition rather than a shared base
/// class for `ControllerNode`/`ChordNetwork`-style layers: each layer
/// holds a plain `Arc<Network>` handle and registers itself as a handler.
pub struct Node {
    pub network: Arc<Network>,
    pub election: Option<Arc<election::Election>>,
    pub chord: Option<Arc<chord::ChordRing>>,
    pub chunks: Arc<chunk::ChunkTable>,
    config: NodeConfig,
}

impl Node {
    pub async fn start(config: NodeConfig) -> std::io::Result<Self> {
        let network = Network::start(NetConfig::new(config.node_id.clone())).await?;

        let election = if !config.controllers.is_empty() {
            let controllers = if config.is_controller {
                full_controller_set(&config)
            } else {
                config.controllers.clone()
            };
            let election = election::Election::new(network.clone(), controllers, config.is_controller);
            network.register_handler(election.clone()).await;
            election.start();
            Some(election)
        } else {
            None
        };

        let chord = if config.chord {
            let ring = chord::ChordRing::new(network.clone(), rand::random::<u32>());
            network.register_handler(ring.clone()).await;
            ring.start();
            Some(ring)
        } else {
            None
        };

        for peer in &config.controllers {
            network.connect(peer.clone());
        }
        if let Some(ring) = &chord {
            ring.join(&config.controllers).await;
        }

        if config.web_interface {
            let network = network.clone();
            let port = config.node_id.port();
            tokio::spawn(async move { http::serve(network, port).await });
        }

        info!(
            "node {} started (controllers={}, is_controller={}, chord={})",
            config.node_id,
            config.controllers.len(),
            config.is_controller,
            config.chord
        );

        Ok(Self {
            network,
            election,
            chord,
            chunks: Arc::new(chunk::ChunkTable::new()),
            config,
        })
    }

    pub fn local(&self) -> &NodeId {
        &self.config.node_id
    }

    pub fn shutdown(&self) {
        self.network.shutdown();
        if let Some(election) = &self.election {
            election.shutdown();
        }
        if let Some(chord) = &self.chord {
            chord.shutdown();
        }
    }
}

/// The full controller set, local address included.
fn full_controller_set(config: &NodeConfig) -> Vec<NodeId> {
    let mut controllers = config.controllers.clone();
    if !controllers.contains(&config.node_id) {
        controllers.push(config.node_id.clone());
    }
    controllers
}
