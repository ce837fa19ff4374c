//! The peer network: framing, connection registry, message engine.

pub mod codec;
pub mod connection;
pub mod engine;
pub mod kinds;
pub mod message;
pub mod registry;
pub mod shutdown;

pub use engine::{NetConfig, NetEvent, MessageHandler, Network};
pub use message::{Direction, Message, Status};
