//! Sub-resource entities refreshed periodically from the daemon.
//!
//! Amounts are always millisatoshis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{NodeAddress, NodeId};

// ============================================================================
// Peers
// ============================================================================

/// A peer the node has (or had) a connection with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: NodeId,
    pub connected: bool,
    pub netaddr: Vec<String>,
    /// Number of channels with this peer, in any state.
    pub channel_count: usize,
    /// Sum of our balance across this peer's channels.
    pub to_us_msat: u64,
    /// Sum of the total capacity across this peer's channels.
    pub total_msat: u64,
}

// ============================================================================
// Payments
// ============================================================================

/// Status of an outgoing payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Complete,
    Failed,
}

impl PaymentStatus {
    /// Parses the daemon's status string, treating unknown values as pending.
    pub fn from_daemon(s: &str) -> Self {
        match s {
            "complete" => Self::Complete,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// An outgoing payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_hash: String,
    pub status: PaymentStatus,
    pub destination: Option<NodeId>,
    pub amount_msat: Option<u64>,
    pub amount_sent_msat: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Wallet
// ============================================================================

/// On-chain and in-channel funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Funds {
    pub confirmed_msat: u64,
    pub unconfirmed_msat: u64,
    /// Our side of all channels.
    pub channel_msat: u64,
    pub output_count: usize,
    pub channel_count: usize,
}

impl Funds {
    /// On-chain total, confirmed or not.
    #[must_use]
    pub fn onchain_msat(&self) -> u64 {
        self.confirmed_msat.saturating_add(self.unconfirmed_msat)
    }
}

// ============================================================================
// Invoices
// ============================================================================

/// Status of an incoming invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
    Expired,
}

impl InvoiceStatus {
    pub fn from_daemon(s: &str) -> Self {
        match s {
            "paid" => Self::Paid,
            "expired" => Self::Expired,
            _ => Self::Unpaid,
        }
    }
}

/// An invoice created by this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub label: String,
    pub payment_hash: String,
    pub status: InvoiceStatus,
    pub amount_msat: Option<u64>,
    pub description: Option<String>,
    pub bolt11: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Network Graph
// ============================================================================

/// A node seen in the gossip graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub alias: Option<String>,
    pub color: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub addresses: Vec<NodeAddress>,
}
