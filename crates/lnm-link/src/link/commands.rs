//! Link actor inputs, observer events and status snapshot.
//!
//! - `LinkCommand`: requests from handles (calls, status queries, restart)
//! - `ActorEvent`: reports from the tasks the actor spawned (connect
//!   attempts, socket I/O, daemon exits)
//! - `LinkEvent`: what observers see, published only on actual change
//! - `LinkStatus`: point-in-time snapshot returned by `LinkHandle::status`

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use lnm_core::{ConnectionState, LinkFailure, NodeInfo, TransportError};
use lnm_protocol::Frame;

use crate::rpc::ReplySink;
use crate::transport::BoxedStream;

// ============================================================================
// Commands
// ============================================================================

/// Commands sent to the link actor.
#[derive(Debug)]
pub(crate) enum LinkCommand {
    /// Issue an RPC call on the current connection.
    Call {
        method: String,
        params: Value,
        sink: ReplySink,
    },

    /// Report a status snapshot.
    Status {
        respond_to: oneshot::Sender<LinkStatus>,
    },

    /// Clear a terminal failure and reconnect now.
    Restart,
}

/// Reports from tasks spawned by the actor.
pub(crate) enum ActorEvent {
    /// A connect attempt finished (or timed out).
    ConnectFinished {
        attempt: u64,
        result: Result<BoxedStream, TransportError>,
    },

    /// A frame arrived on connection `generation`.
    Frame { generation: u64, frame: Frame },

    /// Connection `generation` closed. `None` means a clean EOF.
    TransportClosed {
        generation: u64,
        error: Option<TransportError>,
    },

    /// The daemon from launch `launch` exited.
    DaemonExited {
        launch: u64,
        code: Option<i32>,
        output: Vec<String>,
    },
}

// ============================================================================
// Observer Events
// ============================================================================

/// Events published to link observers.
///
/// Each is sent once per actual change; repeating the same condition
/// (another failed retry, the same `getinfo` result) publishes nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The connected flag flipped.
    ConnectionChanged { connected: bool },

    /// The classified last error changed. `None` clears it.
    ErrorChanged(Option<LinkFailure>),

    /// The node info snapshot changed.
    InfoChanged(NodeInfo),

    /// An unsolicited message from the daemon.
    Notification { method: String, params: Value },
}

/// Snapshot of the link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub last_error: Option<LinkFailure>,
    /// True after a terminal failure until `restart()`.
    pub halted: bool,
    pub node_info: NodeInfo,
    pub pending_calls: usize,
    pub connect_attempts: u64,
    pub sync_passes: u64,
    pub daemon_pid: Option<u32>,
}
