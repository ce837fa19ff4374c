//! CLI parsing and config resolution.

use crate::error::ConfigError;
use crate::identity::NodeId;
use clap::Parser;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "meshdb-node", about = "A peer-to-peer clustered database runtime node")]
pub struct Args {
    /// Listening port. Missing defaults to 5000; out of `1..=65535` is rejected.
    #[arg(short = 'p', long)]
    pub port: Option<i64>,

    /// Comma-separated `host:port` list of the other configured controllers.
    #[arg(short = 'n', long, value_delimiter = ',')]
    pub nodes: Vec<String>,

    /// Participate in the Chord ring instead of (or alongside) leader election.
    #[arg(long)]
    pub chord: bool,

    /// Run as a database (non-controller) node: track the leader via
    /// `LeaderRequest` instead of casting votes. Ignored if `--nodes` is
    /// empty, since then there is no leader to track.
    #[arg(long)]
    pub database_node: bool,

    #[arg(short = 'w', long)]
    pub enablewebinterface: bool,

    #[arg(short = 'l', long)]
    pub loglocation: Option<String>,

    #[arg(long, default_value = "info")]
    pub loglevel: String,
}

/// Resolved, validated configuration — the only place a CLI flag value is
/// read after startup. No global mutable state past this point.
pub struct NodeConfig {
    pub node_id: NodeId,
    pub controllers: Vec<NodeId>,
    pub is_controller: bool,
    pub chord: bool,
    pub web_interface: bool,
    pub log_location: Option<String>,
    pub log_level: Level,
}

impl NodeConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let port = args.port.unwrap_or(5000);
        if !(1..=65535).contains(&port) {
            return Err(ConfigError::InvalidPort(port));
        }
        let node_id = NodeId::new("localhost", port as u16);

        let mut controllers = Vec::new();
        for raw in &args.nodes {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let parsed = NodeId::parse(raw).map_err(|e| ConfigError::InvalidNode(raw.to_string(), e))?;
            controllers.push(parsed);
        }

        let log_level = match args.loglevel.to_lowercase().as_str() {
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warning" | "warn" => Level::WARN,
            "error" => Level::ERROR,
            other => return Err(ConfigError::InvalidLogLevel(other.to_string())),
        };

        Ok(Self {
            node_id,
            controllers,
            is_controller: !args.database_node,
            chord: args.chord,
            web_interface: args.enablewebinterface,
            log_location: args.loglocation,
            log_level,
        })
    }
}
