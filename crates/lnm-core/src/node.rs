//! Identity and status of the local node.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Public key of a Lightning node, hex encoded.
///
/// Kept opaque: the daemon supplies it and we only display and compare it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a shortened display form (first 12 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Node Info
// ============================================================================

/// An address the node announces or listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Address family as reported by the daemon ("ipv4", "torv3", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl NodeAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            kind: None,
            address: address.into(),
            port: None,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.address, port),
            None => f.write_str(&self.address),
        }
    }
}

/// Snapshot of the node as reported by `getinfo`.
///
/// Replaced wholesale on every successful refresh, never patched field by field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub addresses: Vec<NodeAddress>,
    pub version: String,
    pub blockheight: u32,
    pub network: String,
    pub port: u16,
}

impl NodeInfo {
    /// Returns true until the first successful refresh.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.id.is_empty()
    }

    /// Returns the first announced address, if any.
    pub fn primary_address(&self) -> Option<&NodeAddress> {
        self.addresses.first()
    }
}
