//! Parsing daemon RPC result payloads.
//!
//! Raw types mirror what the daemon returns and tolerate the field
//! renames between daemon releases (`msatoshi` vs `amount_msat`, amounts as
//! integers vs `"123msat"` strings, `address` as string vs list). Each one
//! converts into the corresponding `lnm-core` type.

use chrono::{DateTime, Utc};
use lnm_core::{
    Funds, GraphNode, Invoice, InvoiceStatus, NodeAddress, NodeId, NodeInfo, Payment,
    PaymentStatus, Peer,
};
use serde::de::{self, Deserializer};
use serde::Deserialize;

// ============================================================================
// Shared Field Types
// ============================================================================

/// Millisatoshi amount, accepted as `1000` or `"1000msat"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Msat(pub u64);

impl<'de> Deserialize<'de> for Msat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(u64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Int(value) => Ok(Self(value)),
            Repr::Text(text) => text
                .trim_end_matches("msat")
                .parse()
                .map(Self)
                .map_err(|_| de::Error::custom(format!("invalid msat amount: {text}"))),
        }
    }
}

/// An address entry as reported by `getinfo` and `listnodes`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawAddress {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl RawAddress {
    fn to_node_address(&self) -> Option<NodeAddress> {
        Some(NodeAddress {
            kind: self.kind.clone(),
            address: self.address.clone()?,
            port: self.port,
        })
    }
}

/// Older daemons report `address` as a plain string.
fn one_or_many_addresses<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<RawAddress>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Many(Vec<RawAddress>),
        One(String),
    }

    Ok(match Option::<Repr>::deserialize(deserializer)? {
        Some(Repr::Many(list)) => list,
        Some(Repr::One(address)) if !address.is_empty() => vec![RawAddress {
            kind: None,
            address: Some(address),
            port: None,
        }],
        _ => Vec::new(),
    })
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

// ============================================================================
// getinfo
// ============================================================================

/// Result of `getinfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawGetInfo {
    pub id: String,
    #[serde(default, deserialize_with = "one_or_many_addresses")]
    pub address: Vec<RawAddress>,
    #[serde(default, deserialize_with = "one_or_many_addresses")]
    pub binding: Vec<RawAddress>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub blockheight: u32,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub port: Option<u16>,
}

impl RawGetInfo {
    /// Converts into a `NodeInfo` snapshot.
    ///
    /// The listening port comes from the top-level `port` field when present,
    /// otherwise from the first announced address, then the first binding.
    pub fn to_node_info(&self) -> NodeInfo {
        let port = self
            .port
            .or_else(|| self.address.iter().find_map(|a| a.port))
            .or_else(|| self.binding.iter().find_map(|a| a.port))
            .unwrap_or(0);

        NodeInfo {
            id: NodeId::new(self.id.clone()),
            addresses: self
                .address
                .iter()
                .filter_map(RawAddress::to_node_address)
                .collect(),
            version: self.version.clone(),
            blockheight: self.blockheight,
            network: self.network.clone(),
            port,
        }
    }
}

// ============================================================================
// listpeers
// ============================================================================

/// Result of `listpeers`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawListPeers {
    #[serde(default)]
    pub peers: Vec<RawPeer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPeer {
    pub id: String,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub netaddr: Vec<String>,
    #[serde(default)]
    pub channels: Vec<RawPeerChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPeerChannel {
    #[serde(default, alias = "msatoshi_to_us")]
    pub to_us_msat: Option<Msat>,
    #[serde(default, alias = "msatoshi_total")]
    pub total_msat: Option<Msat>,
}

impl RawListPeers {
    pub fn to_peers(&self) -> Vec<Peer> {
        self.peers
            .iter()
            .map(|peer| Peer {
                id: NodeId::new(peer.id.clone()),
                connected: peer.connected,
                netaddr: peer.netaddr.clone(),
                channel_count: peer.channels.len(),
                to_us_msat: peer
                    .channels
                    .iter()
                    .filter_map(|c| c.to_us_msat)
                    .fold(0u64, |acc, m| acc.saturating_add(m.0)),
                total_msat: peer
                    .channels
                    .iter()
                    .filter_map(|c| c.total_msat)
                    .fold(0u64, |acc, m| acc.saturating_add(m.0)),
            })
            .collect()
    }
}

// ============================================================================
// listpays
// ============================================================================

/// Result of `listpays`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawListPays {
    #[serde(default)]
    pub pays: Vec<RawPay>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPay {
    pub payment_hash: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default, alias = "msatoshi")]
    pub amount_msat: Option<Msat>,
    #[serde(default, alias = "msatoshi_sent")]
    pub amount_sent_msat: Option<Msat>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl RawListPays {
    pub fn to_payments(&self) -> Vec<Payment> {
        self.pays
            .iter()
            .map(|pay| Payment {
                payment_hash: pay.payment_hash.clone(),
                status: PaymentStatus::from_daemon(&pay.status),
                destination: pay.destination.clone().map(NodeId::new),
                amount_msat: pay.amount_msat.map(|m| m.0),
                amount_sent_msat: pay.amount_sent_msat.map(|m| m.0),
                created_at: timestamp(pay.created_at),
            })
            .collect()
    }
}

// ============================================================================
// listfunds
// ============================================================================

/// Result of `listfunds`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawListFunds {
    #[serde(default)]
    pub outputs: Vec<RawOutput>,
    #[serde(default)]
    pub channels: Vec<RawFundChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOutput {
    #[serde(default)]
    pub amount_msat: Option<Msat>,
    /// Satoshis, reported by older daemons instead of `amount_msat`.
    #[serde(default)]
    pub value: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
}

impl RawOutput {
    fn msat(&self) -> u64 {
        self.amount_msat
            .map(|m| m.0)
            .or_else(|| self.value.map(|sat| sat.saturating_mul(1000)))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFundChannel {
    #[serde(default)]
    pub our_amount_msat: Option<Msat>,
    /// Satoshis, reported by older daemons instead of `our_amount_msat`.
    #[serde(default)]
    pub channel_sat: Option<u64>,
}

impl RawListFunds {
    pub fn to_funds(&self) -> Funds {
        let mut funds = Funds {
            output_count: self.outputs.len(),
            channel_count: self.channels.len(),
            ..Funds::default()
        };

        for output in &self.outputs {
            // Outputs without a status predate the field and are confirmed.
            match output.status.as_deref() {
                Some("unconfirmed") => {
                    funds.unconfirmed_msat = funds.unconfirmed_msat.saturating_add(output.msat());
                }
                Some("spent") => {}
                _ => funds.confirmed_msat = funds.confirmed_msat.saturating_add(output.msat()),
            }
        }

        funds.channel_msat = self
            .channels
            .iter()
            .map(|c| {
                c.our_amount_msat
                    .map(|m| m.0)
                    .or_else(|| c.channel_sat.map(|sat| sat.saturating_mul(1000)))
                    .unwrap_or(0)
            })
            .fold(0u64, u64::saturating_add);

        funds
    }
}

// ============================================================================
// listinvoices
// ============================================================================

/// Result of `listinvoices`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawListInvoices {
    #[serde(default)]
    pub invoices: Vec<RawInvoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInvoice {
    pub label: String,
    #[serde(default)]
    pub payment_hash: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "msatoshi")]
    pub amount_msat: Option<Msat>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub bolt11: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub paid_at: Option<i64>,
}

impl RawListInvoices {
    pub fn to_invoices(&self) -> Vec<Invoice> {
        self.invoices
            .iter()
            .map(|inv| Invoice {
                label: inv.label.clone(),
                payment_hash: inv.payment_hash.clone(),
                status: InvoiceStatus::from_daemon(&inv.status),
                amount_msat: inv.amount_msat.map(|m| m.0),
                description: inv.description.clone(),
                bolt11: inv.bolt11.clone(),
                expires_at: timestamp(inv.expires_at),
                paid_at: timestamp(inv.paid_at),
            })
            .collect()
    }
}

// ============================================================================
// listnodes
// ============================================================================

/// Result of `listnodes`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawListNodes {
    #[serde(default)]
    pub nodes: Vec<RawNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNode {
    pub nodeid: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub last_timestamp: Option<i64>,
    #[serde(default)]
    pub addresses: Vec<RawAddress>,
}

impl RawListNodes {
    pub fn to_graph_nodes(&self) -> Vec<GraphNode> {
        self.nodes
            .iter()
            .map(|node| GraphNode {
                id: NodeId::new(node.nodeid.clone()),
                alias: node.alias.clone(),
                color: node.color.clone(),
                last_update: timestamp(node.last_timestamp),
                addresses: node
                    .addresses
                    .iter()
                    .filter_map(RawAddress::to_node_address)
                    .collect(),
            })
            .collect()
    }
}
