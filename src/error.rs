//! Error taxonomy for the node's module boundaries.
//!
//! None of these ever cross a spawned task as a panic. Each one collapses
//! into a logged line plus a state transition on the affected `Message`
//! or `Connection` — callers of the network layer only ever observe
//! failure through `Message::status`.

use thiserror::Error;

/// Errors raised while decoding or encoding a wire frame.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame payload exceeds limit: {0} bytes")]
    TooLarge(usize),
}

/// Errors raised by the node identity parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("missing port in node address")]
    MissingPort,

    #[error("invalid port: {0}")]
    InvalidPort(String),
}

/// Errors raised resolving CLI flags into a `NodeConfig`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid port {0}: must be between 1 and 65535")]
    InvalidPort(i64),

    #[error("invalid node address '{0}': {1}")]
    InvalidNode(String, IdentityError),

    #[error("invalid log level '{0}'")]
    InvalidLogLevel(String),
}
