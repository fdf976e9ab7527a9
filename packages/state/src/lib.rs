#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Persisted relocation state.
//!
//! Everything lives in one state directory (see [`paths::StatePaths`]):
//!
//! | File | Written by | Read by |
//! |---|---|---|
//! | `steps.log` | [`ledger::StepLedger`] after every completed step | every run, at startup |
//! | `manifest.log` | [`manifest::ManifestLog`] after every bulk copy | operators only |
//! | `debug.log` | the CLI logger | operators only |
//! | `<bucket>.metadata.json` | [`snapshot::SnapshotStore`] at the end of the seed stage | the cutover stage |
//!
//! When every requested bucket reaches the final step, [`archive`] renames
//! these files with a `.completed-<timestamp>` suffix so a later run
//! against the same bucket names starts from scratch.

pub mod archive;
pub mod ledger;
pub mod manifest;
pub mod paths;
pub mod snapshot;

use std::path::PathBuf;

/// Errors reading or writing persisted state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// I/O error on a state file.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A state file could not be (de)serialized.
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// A ledger line other than the last one is unreadable.
    #[error("Corrupt step ledger {path} at line {line}: {message}")]
    CorruptLedger {
        /// Ledger file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        message: String,
    },
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
