#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Migration step, bucket state, and bucket metadata types.
//!
//! A relocation moves every object of a bucket through a temporary bucket
//! (`<source><suffix>`) and back into a recreated source bucket at the new
//! location and storage class. The move is split into two [`Stage`]s made
//! of fifteen globally-numbered [`Step`]s, and every bucket is always in
//! exactly one [`BucketState`] derived from its last completed step.

pub mod metadata;
pub mod object;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use metadata::{
    AclDocument, CorsRule, Grant, Grantee, LoggingConfig, MetadataSnapshot, WebsiteConfig,
};
pub use object::{CopiedObject, CopyReport, CopyRequest, ObjectDescriptor};

/// Default suffix appended to a source bucket name to derive the temporary
/// bucket name.
pub const DEFAULT_TEMP_SUFFIX: &str = "-relocate";

/// One of the fifteen ordered migration steps.
///
/// Step numbers are global across both stages so a cutover run can verify
/// that the seed stage finished for a bucket.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    /// The source bucket must exist.
    CheckExists = 1,
    /// Optionally verify every object in the source can be read.
    CheckReadable = 2,
    /// Write and delete a probe object in the source.
    CheckWritable = 3,
    /// Create the temporary bucket at the target location/class.
    CreateTempBucket = 4,
    /// Enable versioning on the temporary bucket if the source has it.
    MirrorVersioning = 5,
    /// Copy every object from the source into the temporary bucket.
    SeedCopy = 6,
    /// Capture bucket-level configuration into the snapshot store.
    SnapshotMetadata = 7,
    /// Copy objects written to the source since the seed copy.
    CatchUpCopy = 8,
    /// Delete every object (all versions) from the source.
    PurgeSource = 9,
    /// Delete the emptied source bucket.
    DeleteSource = 10,
    /// Recreate the source bucket name at the target location/class.
    RecreateSource = 11,
    /// Restore bucket-level configuration from the snapshot.
    RestoreMetadata = 12,
    /// Copy every object from the temporary bucket back into the source.
    CopyBack = 13,
    /// Delete every object (all versions) from the temporary bucket.
    PurgeTemp = 14,
    /// Delete the emptied temporary bucket.
    DeleteTemp = 15,
}

impl Step {
    /// Every step in execution order.
    pub const ALL: &[Self] = &[
        Self::CheckExists,
        Self::CheckReadable,
        Self::CheckWritable,
        Self::CreateTempBucket,
        Self::MirrorVersioning,
        Self::SeedCopy,
        Self::SnapshotMetadata,
        Self::CatchUpCopy,
        Self::PurgeSource,
        Self::DeleteSource,
        Self::RecreateSource,
        Self::RestoreMetadata,
        Self::CopyBack,
        Self::PurgeTemp,
        Self::DeleteTemp,
    ];

    /// The last step of the seed stage. A cutover may only begin once a
    /// bucket has recorded this step.
    pub const SEED_COMPLETE: Self = Self::SnapshotMetadata;

    /// The terminal step.
    pub const FINAL: Self = Self::DeleteTemp;

    /// Returns the global step number (1-15).
    #[must_use]
    pub const fn number(self) -> u32 {
        self as u32
    }

    /// Looks up a step by its global number.
    #[must_use]
    pub const fn from_number(number: u32) -> Option<Self> {
        match number {
            1 => Some(Self::CheckExists),
            2 => Some(Self::CheckReadable),
            3 => Some(Self::CheckWritable),
            4 => Some(Self::CreateTempBucket),
            5 => Some(Self::MirrorVersioning),
            6 => Some(Self::SeedCopy),
            7 => Some(Self::SnapshotMetadata),
            8 => Some(Self::CatchUpCopy),
            9 => Some(Self::PurgeSource),
            10 => Some(Self::DeleteSource),
            11 => Some(Self::RecreateSource),
            12 => Some(Self::RestoreMetadata),
            13 => Some(Self::CopyBack),
            14 => Some(Self::PurgeTemp),
            15 => Some(Self::DeleteTemp),
            _ => None,
        }
    }

    /// Human-readable step description used in log output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::CheckExists => "check source bucket exists",
            Self::CheckReadable => "verify object read permissions",
            Self::CheckWritable => "verify bucket write permission",
            Self::CreateTempBucket => "create temporary bucket",
            Self::MirrorVersioning => "mirror versioning to temporary bucket",
            Self::SeedCopy => "copy objects to temporary bucket",
            Self::SnapshotMetadata => "snapshot bucket metadata",
            Self::CatchUpCopy => "catch-up copy to temporary bucket",
            Self::PurgeSource => "delete all objects from source bucket",
            Self::DeleteSource => "delete source bucket",
            Self::RecreateSource => "recreate source bucket",
            Self::RestoreMetadata => "restore bucket metadata",
            Self::CopyBack => "copy objects back to source bucket",
            Self::PurgeTemp => "delete all objects from temporary bucket",
            Self::DeleteTemp => "delete temporary bucket",
        }
    }

    /// The stage this step belongs to.
    #[must_use]
    pub const fn stage(self) -> Stage {
        if self.number() <= Self::SEED_COMPLETE.number() {
            Stage::Seed
        } else {
            Stage::Cutover
        }
    }

    /// The state a bucket is in once this step has completed.
    #[must_use]
    pub const fn resulting_state(self) -> BucketState {
        BucketState::from_last_step(self.number())
    }
}

/// One of the two migration stages.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    /// Long-running, non-disruptive copy into the temporary bucket.
    Seed,
    /// Short, disruptive swap of bucket identities.
    Cutover,
}

impl Stage {
    /// The steps of this stage, in execution order.
    #[must_use]
    pub fn steps(self) -> &'static [Step] {
        let split = Step::SEED_COMPLETE.number() as usize;
        match self {
            Self::Seed => &Step::ALL[..split],
            Self::Cutover => &Step::ALL[split..],
        }
    }
}

/// Which stage(s) a single invocation runs.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StageSelection {
    /// Stage 1 only.
    #[default]
    Seed,
    /// Stage 2 only.
    Cutover,
    /// Stage 1 for every bucket, then stage 2 for every bucket.
    Both,
}

impl StageSelection {
    /// The stages to run, in order.
    #[must_use]
    pub const fn stages(self) -> &'static [Stage] {
        match self {
            Self::Seed => &[Stage::Seed],
            Self::Cutover => &[Stage::Cutover],
            Self::Both => &[Stage::Seed, Stage::Cutover],
        }
    }
}

/// Linear per-bucket state machine.
///
/// States only ever advance; the derived state for a bucket is a pure
/// function of its highest completed step.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BucketState {
    /// Nothing recorded yet, or validation still in progress.
    Unvalidated,
    /// All validation steps passed.
    Validated,
    /// Temporary bucket exists.
    TempCreated,
    /// Versioning mirrored onto the temporary bucket.
    VersioningMirrored,
    /// Objects seeded into the temporary bucket.
    Seeded,
    /// Bucket metadata captured. Stage 1 is complete.
    MetadataSnapshotted,
    /// Late writes copied into the temporary bucket.
    CaughtUp,
    /// Source bucket emptied.
    SourcePurged,
    /// Source bucket deleted.
    SourceDeleted,
    /// Source bucket recreated at the target location/class.
    SourceRecreated,
    /// Bucket metadata restored onto the recreated source.
    MetadataRestored,
    /// Objects copied back into the recreated source.
    CopiedBack,
    /// Temporary bucket emptied.
    TempPurged,
    /// Temporary bucket deleted; migration finished.
    Completed,
}

impl BucketState {
    /// Derives the state from the highest completed step number.
    ///
    /// Numbers beyond the final step saturate at [`Self::Completed`].
    #[must_use]
    pub const fn from_last_step(step: u32) -> Self {
        match step {
            0..=2 => Self::Unvalidated,
            3 => Self::Validated,
            4 => Self::TempCreated,
            5 => Self::VersioningMirrored,
            6 => Self::Seeded,
            7 => Self::MetadataSnapshotted,
            8 => Self::CaughtUp,
            9 => Self::SourcePurged,
            10 => Self::SourceDeleted,
            11 => Self::SourceRecreated,
            12 => Self::MetadataRestored,
            13 => Self::CopiedBack,
            14 => Self::TempPurged,
            _ => Self::Completed,
        }
    }
}

/// Versioning mode of a bucket. Suspended versioning is reported as
/// [`Versioning::Disabled`].
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Versioning {
    /// Multiple versions of an object are retained.
    Enabled,
    /// Only the current version is retained.
    #[default]
    Disabled,
}

impl Versioning {
    /// Returns `true` for [`Versioning::Enabled`].
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// Where (and in which storage class) the relocated bucket should live.
///
/// `None` leaves the choice to the storage backend's default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationTarget {
    /// Target location / region constraint.
    pub location: Option<String>,
    /// Target storage class.
    pub storage_class: Option<String>,
}

impl RelocationTarget {
    /// Returns `true` when neither a location nor a class was requested.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        self.location.is_none() && self.storage_class.is_none()
    }
}

impl std::fmt::Display for RelocationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "location={}, class={}",
            self.location.as_deref().unwrap_or("(default)"),
            self.storage_class.as_deref().unwrap_or("(default)")
        )
    }
}

/// A single bucket relocation requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationJob {
    /// Source bucket name; also the key for all persisted state.
    pub source: String,
    /// Temporary bucket name, derived from `source`.
    pub temp: String,
    /// Requested location/class.
    pub target: RelocationTarget,
    /// Whether the optional object read-permission check runs.
    pub verify_read: bool,
}

impl MigrationJob {
    /// Builds a job, deriving the temporary bucket name as
    /// `<source><temp_suffix>`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidBucketNameError`] if either the source or the
    /// derived temporary name is not a valid bucket name.
    pub fn new(
        source: &str,
        temp_suffix: &str,
        target: RelocationTarget,
        verify_read: bool,
    ) -> Result<Self, InvalidBucketNameError> {
        validate_bucket_name(source)?;
        let temp = temp_bucket_name(source, temp_suffix);
        validate_bucket_name(&temp)?;
        Ok(Self {
            source: source.to_string(),
            temp,
            target,
            verify_read,
        })
    }
}

/// Derives the temporary bucket name for a source bucket.
#[must_use]
pub fn temp_bucket_name(source: &str, suffix: &str) -> String {
    format!("{source}{suffix}")
}

/// Error returned for a bucket name the storage backend would reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidBucketNameError {
    /// The rejected name.
    pub name: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

impl std::fmt::Display for InvalidBucketNameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid bucket name {:?}: {}", self.name, self.reason)
    }
}

impl std::error::Error for InvalidBucketNameError {}

/// Validates a bucket name: 3-63 characters of lowercase letters, digits,
/// `-`, `_` and `.`, starting and ending with a letter or digit.
///
/// # Errors
///
/// Returns [`InvalidBucketNameError`] describing the first violated rule.
pub fn validate_bucket_name(name: &str) -> Result<(), InvalidBucketNameError> {
    let fail = |reason| {
        Err(InvalidBucketNameError {
            name: name.to_string(),
            reason,
        })
    };

    if name.len() < 3 || name.len() > 63 {
        return fail("must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
    {
        return fail("only lowercase letters, digits, '-', '_' and '.' are allowed");
    }
    let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alnum(name.chars().next()) || !alnum(name.chars().last()) {
        return fail("must start and end with a letter or digit");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_numbers_are_contiguous() {
        for (i, step) in Step::ALL.iter().enumerate() {
            let n = u32::try_from(i + 1).unwrap();
            assert_eq!(step.number(), n);
            assert_eq!(Step::from_number(n), Some(*step));
        }
        assert_eq!(Step::from_number(0), None);
        assert_eq!(Step::from_number(16), None);
    }

    #[test]
    fn stages_partition_the_steps() {
        let seed = Stage::Seed.steps();
        let cutover = Stage::Cutover.steps();
        assert_eq!(seed.first(), Some(&Step::CheckExists));
        assert_eq!(seed.last(), Some(&Step::SEED_COMPLETE));
        assert_eq!(cutover.first(), Some(&Step::CatchUpCopy));
        assert_eq!(cutover.last(), Some(&Step::FINAL));
        assert_eq!(seed.len() + cutover.len(), Step::ALL.len());
        assert!(seed.iter().all(|s| s.stage() == Stage::Seed));
        assert!(cutover.iter().all(|s| s.stage() == Stage::Cutover));
    }

    #[test]
    fn state_follows_last_step() {
        assert_eq!(BucketState::from_last_step(0), BucketState::Unvalidated);
        assert_eq!(BucketState::from_last_step(2), BucketState::Unvalidated);
        assert_eq!(Step::CheckWritable.resulting_state(), BucketState::Validated);
        assert_eq!(
            Step::SnapshotMetadata.resulting_state(),
            BucketState::MetadataSnapshotted
        );
        assert_eq!(Step::DeleteTemp.resulting_state(), BucketState::Completed);
        assert_eq!(BucketState::from_last_step(99), BucketState::Completed);

        let states: Vec<_> = Step::ALL.iter().map(|s| s.resulting_state()).collect();
        assert!(states.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn job_derives_temp_name() {
        let job = MigrationJob::new("demo", DEFAULT_TEMP_SUFFIX, RelocationTarget::default(), false)
            .unwrap();
        assert_eq!(job.temp, "demo-relocate");
    }

    #[test]
    fn job_rejects_temp_name_that_is_too_long() {
        let source = "a".repeat(60);
        let err = MigrationJob::new(&source, DEFAULT_TEMP_SUFFIX, RelocationTarget::default(), false)
            .unwrap_err();
        assert_eq!(err.name, format!("{source}-relocate"));
    }

    #[test]
    fn bucket_name_rules() {
        assert!(validate_bucket_name("my-bucket.logs").is_ok());
        assert!(validate_bucket_name("ab").is_err());
        assert!(validate_bucket_name("Upper").is_err());
        assert!(validate_bucket_name("-leading").is_err());
        assert!(validate_bucket_name("trailing.").is_err());
    }

    #[test]
    fn stage_selection_parses_from_cli_text() {
        assert_eq!("both".parse::<StageSelection>().unwrap(), StageSelection::Both);
        assert_eq!(
            StageSelection::Both.stages(),
            &[Stage::Seed, Stage::Cutover]
        );
        assert_eq!(StageSelection::default(), StageSelection::Seed);
    }
}
