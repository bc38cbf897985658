//! One-time preparation of the daemon binaries before first launch.
//!
//! Some deployments ship `lightningd` and its helper plugins in a
//! read-only location, under mangled names, and need them copied to a
//! writable directory before they can be executed.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::debug;

/// Binaries the daemon needs next to each other to start.
pub const DAEMON_BINARIES: &[&str] = &[
    "lightningd",
    "lightning_channeld",
    "lightning_closingd",
    "lightning_gossipd",
    "lightning_hsmd",
    "lightning_onchaind",
    "lightning_openingd",
];

/// Prepares daemon binaries for launch.
pub trait BinaryStager: Send + Sync {
    /// Stages the binaries.
    ///
    /// Returns the path of the staged `lightningd` when staging relocates
    /// it, or `None` to keep the normally resolved binary.
    ///
    /// # Errors
    ///
    /// Any filesystem error encountered while staging.
    fn prepare_daemon_binary(&self) -> io::Result<Option<PathBuf>>;
}

/// Nothing to stage; the daemon is run in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStaging;

impl BinaryStager for NoStaging {
    fn prepare_daemon_binary(&self) -> io::Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Copies binaries from `source_dir` into `target_dir` and marks them
/// executable.
///
/// Source files are looked up as `{prefix}{name}{suffix}`, so a packaged
/// `liblightningd.so` can be staged as `lightningd`.
#[derive(Debug, Clone)]
pub struct CopyStaging {
    source_dir: PathBuf,
    target_dir: PathBuf,
    binaries: Vec<String>,
    prefix: String,
    suffix: String,
}

impl CopyStaging {
    pub fn new(source_dir: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            target_dir: target_dir.into(),
            binaries: DAEMON_BINARIES.iter().map(|s| (*s).to_string()).collect(),
            prefix: String::new(),
            suffix: String::new(),
        }
    }

    /// Sets the source file naming scheme.
    #[must_use]
    pub fn with_source_naming(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self.suffix = suffix.into();
        self
    }

    /// Replaces the list of binaries to copy.
    #[must_use]
    pub fn with_binaries<I, S>(mut self, binaries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.binaries = binaries.into_iter().map(Into::into).collect();
        self
    }
}

impl BinaryStager for CopyStaging {
    fn prepare_daemon_binary(&self) -> io::Result<Option<PathBuf>> {
        fs::create_dir_all(&self.target_dir)?;

        for name in &self.binaries {
            let source = self
                .source_dir
                .join(format!("{}{name}{}", self.prefix, self.suffix));
            let target = self.target_dir.join(name);
            fs::copy(&source, &target)?;
            make_executable(&target)?;
            debug!(source = %source.display(), target = %target.display(), "Staged daemon binary");
        }

        Ok(Some(self.target_dir.join("lightningd")))
    }
}

#[cfg(unix)]
fn make_executable(path: &std::path::Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &std::path::Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_staging_keeps_resolved_binary() {
        assert_eq!(NoStaging.prepare_daemon_binary().unwrap(), None);
    }

    #[test]
    fn test_copy_staging_renames_and_marks_executable() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let target_dir = target.path().join("bin");
        for name in ["lightningd", "lightning_hsmd"] {
            fs::write(source.path().join(format!("lib{name}.so")), b"#!/bin/sh\n").unwrap();
        }

        let stager = CopyStaging::new(source.path(), &target_dir)
            .with_source_naming("lib", ".so")
            .with_binaries(["lightningd", "lightning_hsmd"]);
        let staged = stager.prepare_daemon_binary().unwrap();

        assert_eq!(staged, Some(target_dir.join("lightningd")));
        assert!(target_dir.join("lightning_hsmd").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(target_dir.join("lightningd")).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }

        // Staging again overwrites in place.
        assert!(stager.prepare_daemon_binary().is_ok());
    }

    #[test]
    fn test_copy_staging_missing_source_fails() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let stager = CopyStaging::new(source.path(), target.path()).with_binaries(["lightningd"]);
        assert!(stager.prepare_daemon_binary().is_err());
    }
}
