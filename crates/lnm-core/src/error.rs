//! Error taxonomy for the connection core, following the panic-free policy.
//!
//! Each layer owns one enum:
//! - `TransportError`: local socket failures, converted into retries
//! - `RpcProtocolError`: malformed or unmatched frames, observed and dropped
//! - `RpcError`: per-call outcomes delivered to the caller only
//! - `DaemonSpawnError` / `DaemonExitError`: supervised process failures
//!
//! `LinkFailure` is the classified last-error surfaced to observers.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Transport
// ============================================================================

/// Failure of the local IPC link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The socket path does not exist.
    #[error("socket not found")]
    NotFound,

    /// The socket exists but we may not open it.
    #[error("permission denied")]
    PermissionDenied,

    /// Nothing is listening on the socket.
    #[error("connection refused")]
    Refused,

    /// The peer reset or closed the connection.
    #[error("connection reset by peer")]
    Reset,

    /// The attempt did not complete within its timeout.
    #[error("connection attempt timed out")]
    Timeout,

    /// Any other I/O failure.
    #[error("socket I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::ConnectionRefused => Self::Refused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::Reset,
            io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(err.to_string()),
        }
    }
}

// ============================================================================
// RPC
// ============================================================================

/// Protocol-level violations. These never fail a call; they are logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcProtocolError {
    /// The frame is not valid JSON or not a JSON-RPC message.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A response carried an id with no pending call.
    #[error("response for unknown id {0}")]
    UnknownId(String),
}

/// Outcome of a single call that did not produce a result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    /// The daemon answered with a JSON-RPC error object.
    #[error("daemon error {code}: {message}")]
    Application {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The connection went away before the response arrived.
    #[error("connection lost")]
    ConnectionLost,

    /// No connection was established when the call was issued.
    #[error("not connected to daemon")]
    NotConnected,

    /// The result did not have the expected shape.
    #[error("unexpected result: {0}")]
    Decode(String),
}

impl RpcError {
    /// Returns true if the daemon itself rejected the call.
    #[must_use]
    pub fn is_application(&self) -> bool {
        matches!(self, Self::Application { .. })
    }
}

// ============================================================================
// Daemon
// ============================================================================

/// Failure to start the daemon process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DaemonSpawnError {
    /// The daemon executable could not be found.
    #[error("daemon executable not found: {0}")]
    ExecNotFound(String),

    /// Staging or process creation failed.
    #[error("failed to launch daemon: {0}")]
    LaunchFailed(String),
}

/// Classification of a supervised daemon's exit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DaemonExitError {
    /// The daemon could not authenticate with its upstream full node.
    #[error("daemon exited: upstream node credentials missing or rejected")]
    CredentialsMissing,

    /// Any other exit. `None` means the process was killed by a signal.
    #[error("daemon exited unexpectedly (code {})", .0.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    UnexpectedExit(Option<i32>),
}

impl DaemonExitError {
    /// Returns true if retrying cannot help until the user intervenes.
    #[must_use]
    pub fn is_disqualifying(&self) -> bool {
        matches!(self, Self::CredentialsMissing)
    }
}

// ============================================================================
// Classified Last Error
// ============================================================================

/// User-visible classified error surfaced by the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum LinkFailure {
    /// A transient condition; the link keeps retrying.
    Generic(String),

    /// The upstream node credentials are missing or wrong; retrying stopped.
    Credentials(String),
}

impl LinkFailure {
    /// Returns the human-readable error string.
    pub fn message(&self) -> &str {
        match self {
            Self::Generic(message) | Self::Credentials(message) => message,
        }
    }

    /// Returns true if this failure stopped automatic retrying.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Credentials(_))
    }
}

impl From<&DaemonExitError> for LinkFailure {
    fn from(err: &DaemonExitError) -> Self {
        match err {
            DaemonExitError::CredentialsMissing => Self::Credentials(err.to_string()),
            DaemonExitError::UnexpectedExit(_) => Self::Generic(err.to_string()),
        }
    }
}

impl From<&DaemonSpawnError> for LinkFailure {
    fn from(err: &DaemonSpawnError) -> Self {
        Self::Generic(err.to_string())
    }
}
