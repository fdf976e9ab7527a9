#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Resumable two-stage bucket relocation.
//!
//! [`Relocator`] drives every requested bucket through the fifteen
//! [`Step`]s of the seed and cutover stages. Before each step it consults
//! the step ledger and skips anything already recorded; after each step
//! succeeds it records the step. Any failure aborts the whole run with a
//! [`RelocateError::Step`] naming the bucket and the step that failed, and
//! the next invocation resumes from the last recorded step.

pub mod config;
pub mod metadata;
pub mod relocator;
pub mod retry;
pub mod status;
pub mod validation;

use bucket_relocate_gateway::GatewayError;
use bucket_relocate_models::{InvalidBucketNameError, RelocationTarget, Step};
use bucket_relocate_state::StateError;

pub use config::RelocateConfig;
pub use relocator::{Relocator, RunSummary};
pub use retry::RetryPolicy;
pub use status::BucketStatus;

/// Errors that abort a relocation run.
#[derive(Debug, thiserror::Error)]
pub enum RelocateError {
    /// The configuration file or an override is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persisted state could not be read or written.
    #[error(transparent)]
    State(#[from] StateError),

    /// A storage operation failed and is not retried.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A source or derived temporary bucket name is invalid.
    #[error(transparent)]
    InvalidBucketName(#[from] InvalidBucketNameError),

    /// The source bucket does not exist.
    #[error("Source bucket {bucket} does not exist")]
    SourceMissing {
        /// Source bucket.
        bucket: String,
    },

    /// The temporary bucket exists although the ledger says it was never
    /// created.
    #[error(
        "Temporary bucket {temp} for {bucket} already exists; \
         remove it or check the step ledger before retrying"
    )]
    TempBucketExists {
        /// Source bucket.
        bucket: String,
        /// Temporary bucket that was found.
        temp: String,
    },

    /// A cutover was requested before the seed stage finished.
    #[error(
        "Bucket {bucket} has completed step {last_step} of {}; \
         run the seed stage to completion before the cutover",
        Step::SEED_COMPLETE.number()
    )]
    StageOneIncomplete {
        /// Offending bucket.
        bucket: String,
        /// Its last completed step.
        last_step: u32,
    },

    /// Objects the caller is not allowed to read.
    #[error("{} object(s) in {bucket} are not readable: {}", .keys.len(), .keys.join(", "))]
    UnreadableObjects {
        /// Source bucket.
        bucket: String,
        /// Keys that returned access denied.
        keys: Vec<String>,
    },

    /// The write-permission probe could not be written.
    #[error("Cannot write probe object {probe} to {bucket}: {source}")]
    ProbeWrite {
        /// Source bucket.
        bucket: String,
        /// Probe object key.
        probe: String,
        /// Underlying failure.
        source: GatewayError,
    },

    /// The write-permission probe was written but could not be removed.
    #[error("Probe object {probe} was left in {bucket} and must be deleted manually: {source}")]
    ProbeCleanup {
        /// Source bucket.
        bucket: String,
        /// Residual probe object key.
        probe: String,
        /// Underlying failure.
        source: GatewayError,
    },

    /// A bucket stayed "not empty" through every delete retry.
    #[error("Bucket {bucket} was still reported not empty after {retries} retries")]
    DeleteRetriesExhausted {
        /// Bucket that could not be deleted.
        bucket: String,
        /// Retries performed after the initial attempt.
        retries: u32,
    },

    /// The metadata snapshot captured by the seed stage is missing.
    #[error("No metadata snapshot found for {bucket}; the seed stage must be re-run")]
    SnapshotMissing {
        /// Source bucket.
        bucket: String,
    },

    /// The cutover was given a different target than the seed stage used.
    #[error("Bucket {bucket} was seeded for ({recorded}) but the cutover requested ({requested})")]
    TargetMismatch {
        /// Source bucket.
        bucket: String,
        /// Target recorded by the seed stage.
        recorded: RelocationTarget,
        /// Target passed to this run.
        requested: RelocationTarget,
    },

    /// A step failed.
    #[error("Step {} ({}) failed for bucket {bucket}: {source}", .step.number(), .step.label())]
    Step {
        /// Bucket the step ran for.
        bucket: String,
        /// The step that failed.
        step: Step,
        /// What went wrong.
        source: Box<RelocateError>,
    },
}

impl RelocateError {
    /// The bucket and step that were being attempted when this error
    /// occurred, if it was raised inside a step.
    #[must_use]
    pub fn last_attempted_step(&self) -> Option<(&str, Step)> {
        match self {
            Self::Step { bucket, step, .. } => Some((bucket, *step)),
            _ => None,
        }
    }
}
