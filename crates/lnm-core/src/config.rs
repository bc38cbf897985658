//! Connection configuration supplied by the embedding application.
//!
//! A `ConnectionConfig` is built once (CLI flags, persisted settings) and
//! then shared read-only with the connection core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::Network;

/// File name of the daemon's RPC socket inside the home directory.
pub const DEFAULT_SOCKET_NAME: &str = "lightning-rpc";

/// Directory name of the daemon's data directory inside the home directory.
pub const DEFAULT_LIGHTNING_DIR_NAME: &str = "lightning-data";

/// File name of the daemon's pid file inside the home directory.
pub const DEFAULT_PID_FILE_NAME: &str = "lightning.pid";

/// Returns the user's home directory, falling back to `/tmp`.
pub fn default_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}

// ============================================================================
// Upstream Full Node
// ============================================================================

/// Connection parameters for the upstream full node the daemon relies on.
///
/// Every field is optional; only the ones set are forwarded to the daemon.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamNode {
    /// Path to the full node's CLI binary.
    #[serde(default)]
    pub cli_path: Option<PathBuf>,
    /// Full node data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Host of the full node's RPC interface.
    #[serde(default)]
    pub rpc_connect: Option<String>,
    #[serde(default)]
    pub rpc_port: Option<u16>,
    #[serde(default)]
    pub rpc_user: Option<String>,
    #[serde(default)]
    pub rpc_password: Option<String>,
}

impl UpstreamNode {
    /// Returns true when no parameter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// Password stays out of logs.
impl fmt::Debug for UpstreamNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamNode")
            .field("cli_path", &self.cli_path)
            .field("data_dir", &self.data_dir)
            .field("rpc_connect", &self.rpc_connect)
            .field("rpc_port", &self.rpc_port)
            .field("rpc_user", &self.rpc_user)
            .field(
                "rpc_password",
                &self.rpc_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

// ============================================================================
// Connection Configuration
// ============================================================================

/// Everything the core needs to reach (or launch) the local daemon.
///
/// # Example
///
/// ```rust
/// use lnm_core::{ConnectionConfig, Network};
///
/// let config = ConnectionConfig::default()
///     .with_socket_path("/tmp/lightning-rpc")
///     .with_network(Network::Regtest);
/// assert_eq!(config.network, Network::Regtest);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Unix socket the daemon serves JSON-RPC on.
    pub socket_path: PathBuf,
    pub network: Network,
    /// Daemon data directory. Defaults to `$HOME/lightning-data`.
    pub lightning_dir: Option<PathBuf>,
    /// Daemon pid file. Defaults to `$HOME/lightning.pid`.
    pub pid_file: Option<PathBuf>,
    /// Explicit daemon executable.
    pub lightningd_path: Option<PathBuf>,
    pub upstream: Option<UpstreamNode>,
    /// Manually advertised external address.
    pub external_address: Option<String>,
    /// Set on the first launch after installation; gates binary staging.
    pub first_start: bool,
    /// Daemon `--log-level`.
    pub log_level: String,
    /// Daemon `--allow-deprecated-apis`.
    pub allow_deprecated_apis: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            socket_path: default_home().join(DEFAULT_SOCKET_NAME),
            network: Network::default(),
            lightning_dir: None,
            pid_file: None,
            lightningd_path: None,
            upstream: None,
            external_address: None,
            first_start: false,
            log_level: "debug".to_string(),
            allow_deprecated_apis: true,
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    #[must_use]
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    #[must_use]
    pub fn with_lightning_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lightning_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_lightningd_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lightningd_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_upstream(mut self, upstream: UpstreamNode) -> Self {
        self.upstream = if upstream.is_empty() {
            None
        } else {
            Some(upstream)
        };
        self
    }

    #[must_use]
    pub fn with_external_address(mut self, address: impl Into<String>) -> Self {
        self.external_address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_first_start(mut self, first_start: bool) -> Self {
        self.first_start = first_start;
        self
    }

    /// Resolved daemon data directory.
    pub fn effective_lightning_dir(&self) -> PathBuf {
        self.lightning_dir
            .clone()
            .unwrap_or_else(|| default_home().join(DEFAULT_LIGHTNING_DIR_NAME))
    }

    /// Resolved daemon pid file.
    pub fn effective_pid_file(&self) -> PathBuf {
        self.pid_file
            .clone()
            .unwrap_or_else(|| default_home().join(DEFAULT_PID_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_live_in_home() {
        let config = ConnectionConfig::default();
        let home = default_home();
        assert_eq!(config.socket_path, home.join("lightning-rpc"));
        assert_eq!(config.effective_lightning_dir(), home.join("lightning-data"));
        assert_eq!(config.effective_pid_file(), home.join("lightning.pid"));
        assert!(!config.first_start);
        assert!(config.allow_deprecated_apis);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ConnectionConfig::default()
            .with_socket_path("/run/ln.sock")
            .with_lightning_dir("/var/ln")
            .with_network(Network::Signet)
            .with_first_start(true);

        assert_eq!(config.socket_path, PathBuf::from("/run/ln.sock"));
        assert_eq!(config.effective_lightning_dir(), PathBuf::from("/var/ln"));
        assert_eq!(config.network, Network::Signet);
        assert!(config.first_start);
    }

    #[test]
    fn test_empty_upstream_is_dropped() {
        let config = ConnectionConfig::default().with_upstream(UpstreamNode::default());
        assert!(config.upstream.is_none());

        let upstream = UpstreamNode {
            rpc_user: Some("igor".into()),
            ..Default::default()
        };
        let config = ConnectionConfig::default().with_upstream(upstream);
        assert!(config.upstream.is_some());
    }

    #[test]
    fn test_upstream_debug_redacts_password() {
        let upstream = UpstreamNode {
            rpc_password: Some("hunter2".into()),
            ..Default::default()
        };
        let debug = format!("{upstream:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
