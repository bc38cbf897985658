//! Persisted upstream node settings.
//!
//! Read once from a TOML file before the link is built:
//!
//! ```toml
//! [bitcoin]
//! rpcconnect = "127.0.0.1"
//! rpcport = 8332
//! rpcuser = "lnm"
//! rpcpassword = "..."
//!
//! [lightning]
//! announce_addr = "203.0.113.7:9735"
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use lnm_core::{ConnectionConfig, UpstreamNode};

use crate::error::SettingsError;

/// Directory under the platform config dir holding `settings.toml`.
const SETTINGS_DIR: &str = "lnm";
const SETTINGS_FILE: &str = "settings.toml";

/// The `[bitcoin]` table.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitcoinSettings {
    pub cli: Option<PathBuf>,
    pub datadir: Option<PathBuf>,
    pub rpcconnect: Option<String>,
    pub rpcport: Option<u16>,
    pub rpcuser: Option<String>,
    pub rpcpassword: Option<String>,
}

impl fmt::Debug for BitcoinSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitcoinSettings")
            .field("cli", &self.cli)
            .field("datadir", &self.datadir)
            .field("rpcconnect", &self.rpcconnect)
            .field("rpcport", &self.rpcport)
            .field("rpcuser", &self.rpcuser)
            .field(
                "rpcpassword",
                &self.rpcpassword.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// The `[lightning]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightningSettings {
    /// Externally reachable address to advertise.
    pub announce_addr: Option<String>,
}

/// Settings file contents. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bitcoin: BitcoinSettings,
    pub lightning: LightningSettings,
}

impl Settings {
    /// Default location: `<config dir>/lnm/settings.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
    }

    /// Loads settings from `path`.
    ///
    /// # Errors
    ///
    /// - `SettingsError::Io` if the file cannot be read
    /// - `SettingsError::Parse` if it is not valid settings TOML
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads settings from `path`, returning defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Same as [`Settings::load`] for a file that exists.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No settings file, using defaults");
            Ok(Self::default())
        }
    }

    /// Upstream node parameters for the daemon.
    pub fn upstream(&self) -> UpstreamNode {
        UpstreamNode {
            cli_path: self.bitcoin.cli.clone(),
            data_dir: self.bitcoin.datadir.clone(),
            rpc_connect: self.bitcoin.rpcconnect.clone(),
            rpc_port: self.bitcoin.rpcport,
            rpc_user: self.bitcoin.rpcuser.clone(),
            rpc_password: self.bitcoin.rpcpassword.clone(),
        }
    }

    /// Copies the persisted values into `config`.
    ///
    /// Values already set on `config` take precedence.
    #[must_use]
    pub fn apply(&self, mut config: ConnectionConfig) -> ConnectionConfig {
        if config.upstream.is_none() {
            config = config.with_upstream(self.upstream());
        }
        if config.external_address.is_none() {
            if let Some(addr) = &self.lightning.announce_addr {
                config = config.with_external_address(addr.clone());
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("settings.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_full_file() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"
[bitcoin]
cli = "/usr/bin/bitcoin-cli"
rpcconnect = "10.0.0.2"
rpcport = 18443
rpcuser = "lnm"
rpcpassword = "hunter2"

[lightning]
announce_addr = "203.0.113.7:9735"
"#,
        );

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.bitcoin.rpcport, Some(18443));
        assert_eq!(settings.bitcoin.cli, Some(PathBuf::from("/usr/bin/bitcoin-cli")));
        assert_eq!(
            settings.lightning.announce_addr.as_deref(),
            Some("203.0.113.7:9735")
        );

        let upstream = settings.upstream();
        assert_eq!(upstream.rpc_connect.as_deref(), Some("10.0.0.2"));
        assert_eq!(upstream.rpc_password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "[bitcoin]\nrpcuser = \"lnm\"\n");

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.bitcoin.rpcuser.as_deref(), Some("lnm"));
        assert_eq!(settings.lightning, LightningSettings::default());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");

        assert_eq!(Settings::load_or_default(&path).unwrap(), Settings::default());
        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::Io { .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "[bitcoin]\nrpcport = \"not a port\"\n");

        let err = Settings::load_or_default(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
        assert!(err.to_string().contains("settings.toml"));
    }

    #[test]
    fn test_apply_fills_unset_fields_only() {
        let settings = Settings {
            bitcoin: BitcoinSettings {
                rpcuser: Some("lnm".into()),
                ..Default::default()
            },
            lightning: LightningSettings {
                announce_addr: Some("203.0.113.7:9735".into()),
            },
        };

        let config = settings.apply(ConnectionConfig::default());
        assert_eq!(
            config.upstream.as_ref().and_then(|u| u.rpc_user.as_deref()),
            Some("lnm")
        );
        assert_eq!(config.external_address.as_deref(), Some("203.0.113.7:9735"));

        let preset = ConnectionConfig::default().with_external_address("198.51.100.1");
        let config = settings.apply(preset);
        assert_eq!(config.external_address.as_deref(), Some("198.51.100.1"));
    }

    #[test]
    fn test_empty_settings_leave_upstream_unset() {
        let config = Settings::default().apply(ConnectionConfig::default());
        assert!(config.upstream.is_none());
    }

    #[test]
    fn test_debug_redacts_password() {
        let settings = BitcoinSettings {
            rpcpassword: Some("hunter2".into()),
            ..Default::default()
        };
        assert!(!format!("{settings:?}").contains("hunter2"));
    }
}
