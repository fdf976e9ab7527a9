#![allow(clippy::module_name_repetitions)]
//! Canonical file paths inside the state directory.

use std::path::{Path, PathBuf};

use crate::StateError;

/// Name of the state directory under `$HOME` when none is configured.
pub const DEFAULT_DIR_NAME: &str = "bucketrelocate";

/// Returns the default state directory, `$HOME/bucketrelocate`.
///
/// Falls back to a relative `bucketrelocate` directory when `HOME` is unset.
#[must_use]
pub fn default_state_dir() -> PathBuf {
    std::env::var_os("HOME").map_or_else(
        || PathBuf::from(DEFAULT_DIR_NAME),
        |home| PathBuf::from(home).join(DEFAULT_DIR_NAME),
    )
}

/// Layout of the state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    /// Layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The state directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The step ledger.
    #[must_use]
    pub fn ledger(&self) -> PathBuf {
        self.root.join("steps.log")
    }

    /// The copy manifest.
    #[must_use]
    pub fn manifest(&self) -> PathBuf {
        self.root.join("manifest.log")
    }

    /// The persistent debug log.
    #[must_use]
    pub fn debug_log(&self) -> PathBuf {
        self.root.join("debug.log")
    }

    /// The optional configuration file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Metadata snapshot for `bucket`.
    #[must_use]
    pub fn snapshot(&self, bucket: &str) -> PathBuf {
        self.root.join(format!("{bucket}.metadata.json"))
    }

    /// Creates the state directory if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory cannot be created.
    pub fn ensure(&self) -> Result<(), StateError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| StateError::io(&self.root, e))?;
        }
        Ok(())
    }
}
