//! Connection supervision and data sync for a local Lightning daemon.
//!
//! This crate owns the link to a daemon that serves JSON-RPC on a Unix
//! socket:
//! - `transport` - socket connector and per-connection reader/writer tasks
//! - `rpc` - request/response correlation and the `RpcHandle` call API
//! - `supervisor` - launching and watching the daemon process
//! - `link` - the connection state machine (actor) and its handle
//! - `sync` - periodic refresh of sub-resources while connected
//! - `models` - the standard sub-resources (peers, payments, wallet, ...)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          LinkActor                          │
//! │   state, retry timer, pending calls, sync scheduler         │
//! └──────┬──────────────────┬───────────────────────┬───────────┘
//!        │ connect          │ frames                │ spawn / exit
//!        ▼                  ▼                       ▼
//! ┌──────────────┐  ┌────────────────┐     ┌──────────────────┐
//! │  Connector   │  │ reader/writer  │     │ DaemonSupervisor │
//! │ (UnixStream) │  │     tasks      │     │  (lightningd)    │
//! └──────────────┘  └────────────────┘     └──────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod error;
pub mod link;
pub mod models;
pub mod rpc;
pub mod settings;
pub mod staging;
pub mod supervisor;
pub mod sync;
pub mod transport;

pub use config::LinkConfig;
pub use error::{LinkError, SettingsError};
pub use link::{spawn_link, LinkBuilder, LinkEvent, LinkHandle, LinkStatus};
pub use models::{InvoicesModel, Models, NodesModel, PaymentsModel, PeersModel, WalletModel};
pub use rpc::{PendingReply, RpcHandle, RpcResult};
pub use settings::Settings;
pub use staging::{BinaryStager, CopyStaging, NoStaging};
pub use supervisor::{build_arguments, classify_exit, resolve_daemon_binary};
pub use sync::{Collaborators, Refresh, SyncSlot};
pub use transport::{BoxedStream, Connector, LinkStream, UnixConnector};
