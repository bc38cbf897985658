//! Errors raised by the link's public surface.

use std::path::PathBuf;
use std::time::Duration;

use lnm_core::LinkFailure;
use thiserror::Error;

/// Errors returned by `LinkHandle` operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The link actor has shut down.
    #[error("link has shut down")]
    ChannelClosed,

    /// No connection was established within the allotted time.
    #[error("daemon not reachable after {0:?}")]
    Timeout(Duration),

    /// The link stopped retrying after a terminal failure.
    #[error("link halted: {}", .0.message())]
    Halted(LinkFailure),
}

/// Errors loading the persisted settings file.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halted_display_uses_failure_message() {
        let err = LinkError::Halted(LinkFailure::Credentials("bad rpcpassword".into()));
        assert_eq!(err.to_string(), "link halted: bad rpcpassword");
    }
}
