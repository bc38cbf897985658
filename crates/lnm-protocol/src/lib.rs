//! LNM Protocol - JSON-RPC wire protocol for the local Lightning daemon
//!
//! This crate provides the request/response message types, the byte-stream
//! frame codec, and the raw payload types returned by the daemon's RPC
//! methods together with their conversion into `lnm-core` domain types.

pub mod codec;
pub mod message;
pub mod parse;
pub mod version;

pub use codec::{Frame, FrameCodec, MAX_FRAME_LEN};
pub use message::{ErrorObject, Inbound, Request, RequestId, JSONRPC_VERSION};
pub use parse::{
    Msat, RawAddress, RawGetInfo, RawListFunds, RawListInvoices, RawListNodes, RawListPays,
    RawListPeers,
};
pub use version::{DaemonVersion, VersionError};
