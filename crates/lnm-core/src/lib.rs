//! LNM Core - Shared types for local Lightning node supervision
//!
//! This crate provides the domain types shared between the wire
//! protocol (`lnm-protocol`), the connection core (`lnm-link`) and the CLI.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod error;
pub mod network;
pub mod node;
pub mod resources;
pub mod state;

// Re-exports for convenience
pub use config::{default_home, ConnectionConfig, UpstreamNode};
pub use error::{
    DaemonExitError, DaemonSpawnError, LinkFailure, RpcError, RpcProtocolError, TransportError,
};
pub use network::{Network, NetworkParseError};
pub use node::{NodeAddress, NodeId, NodeInfo};
pub use resources::{Funds, GraphNode, Invoice, InvoiceStatus, Payment, PaymentStatus, Peer};
pub use state::ConnectionState;
