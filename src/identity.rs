//! Node identity — `(hostname, port)` with a canonical `"hostname:port"` form.
//!
//! `"localhost"` is resolved to the local machine's DNS hostname at
//! construction so that two nodes comparing canonical forms never
//! disagree about what "this machine" means.

use crate::error::IdentityError;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Eq)]
pub struct NodeId {
    hostname: String,
    port: u16,
    canonical: String,
}

impl NodeId {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        let hostname = hostname.into();
        let hostname = if hostname == "localhost" {
            local_hostname()
        } else {
            hostname
        };
        let canonical = format!("{hostname}:{port}");
        Self { hostname, port, canonical }
    }

    /// Parse a `"host:port"` string, as found in `--nodes` or a `JoinRequest` payload.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or(IdentityError::MissingPort)?;
        if host.is_empty() {
            return Err(IdentityError::MissingPort);
        }
        let port: u16 = port
            .parse()
            .map_err(|_| IdentityError::InvalidPort(port.to_string()))?;
        Ok(Self::new(host, port))
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

impl PartialEq for NodeId {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Hash for NodeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_round_trips() {
        let id = NodeId::new("example.com", 5000);
        assert_eq!(id.canonical(), "example.com:5000");
        assert_eq!(id.to_string(), "example.com:5000");
    }

    #[test]
    fn parse_accepts_host_port() {
        let id = NodeId::parse("example.com:5001").unwrap();
        assert_eq!(id.hostname(), "example.com");
        assert_eq!(id.port(), 5001);
    }

    #[test]
    fn parse_rejects_missing_port() {
        assert!(matches!(
            NodeId::parse("example.com"),
            Err(IdentityError::MissingPort)
        ));
    }

    #[test]
    fn parse_rejects_bad_port() {
        assert!(matches!(
            NodeId::parse("example.com:notaport"),
            Err(IdentityError::InvalidPort(_))
        ));
    }

    #[test]
    fn equality_and_ordering_are_on_canonical_form() {
        let a = NodeId::new("a.example.com", 5000);
        let b = NodeId::new("b.example.com", 5000);
        let a2 = NodeId::new("a.example.com", 5000);
        assert_eq!(a, a2);
        assert!(a < b);
    }

    #[test]
    fn localhost_resolves_to_machine_hostname() {
        let id = NodeId::new("localhost", 5000);
        assert_ne!(id.hostname(), "localhost");
    }
}
