//! Ledger-only progress report.

use bucket_relocate_models::{BucketState, Step};
use bucket_relocate_state::ledger::StepLedger;

/// Where a bucket stands according to the step ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketStatus {
    /// Source bucket.
    pub bucket: String,
    /// Highest completed step, 0 if none.
    pub last_step: u32,
    /// State derived from `last_step`.
    pub state: BucketState,
}

impl BucketStatus {
    /// Reads the status of `bucket` from `ledger`.
    #[must_use]
    pub fn from_ledger(ledger: &StepLedger, bucket: &str) -> Self {
        let last_step = ledger.last_completed_step(bucket);
        Self {
            bucket: bucket.to_string(),
            last_step,
            state: BucketState::from_last_step(last_step),
        }
    }

    /// The step a new run would execute next, if any.
    #[must_use]
    pub const fn next_step(&self) -> Option<Step> {
        Step::from_number(self.last_step.saturating_add(1))
    }
}

impl std::fmt::Display for BucketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: step {}/{} ({})",
            self.bucket,
            self.last_step,
            Step::FINAL.number(),
            self.state
        )?;
        if let Some(next) = self.next_step() {
            write!(f, ", next: {} ({})", next.number(), next.label())?;
        }
        Ok(())
    }
}
