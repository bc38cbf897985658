//! Daemon version parsing for compatibility checks.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Release version of the Lightning daemon, as reported by `getinfo`.
///
/// Accepts the daemon's release formats: `v0.9.3`, `0.10.2-modded`,
/// `v23.05.1-12-gabcdef`. Anything after the numeric triple is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DaemonVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl DaemonVersion {
    /// Oldest daemon release whose RPC results we know how to parse.
    pub const MINIMUM_SUPPORTED: DaemonVersion = DaemonVersion {
        major: 0,
        minor: 7,
        patch: 0,
    };

    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses a daemon version string.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let trimmed = s.trim().trim_start_matches('v');
        let core = trimmed
            .split(|c: char| c == '-' || c == '+' || c.is_whitespace())
            .next()
            .unwrap_or_default();

        let mut parts = core.split('.');
        let mut next = |required: bool| -> Result<u16, VersionError> {
            match parts.next() {
                Some(part) => part
                    .parse::<u16>()
                    .map_err(|_| VersionError::InvalidFormat(s.to_string())),
                None if required => Err(VersionError::InvalidFormat(s.to_string())),
                None => Ok(0),
            }
        };

        let major = next(true)?;
        let minor = next(true)?;
        let patch = next(false)?;
        Ok(Self::new(major, minor, patch))
    }

    /// Returns true if this release is at least `MINIMUM_SUPPORTED`.
    pub fn is_supported(&self) -> bool {
        *self >= Self::MINIMUM_SUPPORTED
    }
}

impl PartialOrd for DaemonVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DaemonVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl fmt::Display for DaemonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Errors related to version parsing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version format: {0}")]
    InvalidFormat(String),
}
