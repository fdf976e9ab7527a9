//! Bounded retry for bucket deletion.
//!
//! After a bulk object delete the backend may keep reporting the bucket as
//! not empty for a while. Deleting the bucket is retried on a fixed
//! interval, and only for that failure kind. This is the only in-process
//! retry in the orchestrator; every other step fails fast and is resumed
//! by re-running the tool.

use std::time::Duration;

use bucket_relocate_gateway::StorageGateway;

use crate::RelocateError;
use crate::config::RetrySettings;

/// Fixed-interval retry schedule for "bucket not empty" failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait between attempts.
    pub interval: Duration,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs),
            max_retries: settings.max_retries,
        }
    }
}

impl RetryPolicy {
    /// Deletes `bucket`, retrying while the backend reports it not empty.
    ///
    /// Returns the number of retries that were needed.
    ///
    /// # Errors
    ///
    /// Returns [`RelocateError::DeleteRetriesExhausted`] once every retry
    /// was used, or [`RelocateError::Gateway`] immediately for any other
    /// failure kind.
    pub async fn delete_bucket(
        &self,
        gateway: &dyn StorageGateway,
        bucket: &str,
    ) -> Result<u32, RelocateError> {
        let mut retries = 0;
        loop {
            match gateway.delete_bucket(bucket).await {
                Ok(()) => {
                    if retries > 0 {
                        log::info!("Deleted bucket {bucket} after {retries} retries");
                    }
                    return Ok(retries);
                }
                Err(e) if e.is_not_empty() => {
                    if retries >= self.max_retries {
                        return Err(RelocateError::DeleteRetriesExhausted {
                            bucket: bucket.to_string(),
                            retries,
                        });
                    }
                    retries += 1;
                    log::warn!(
                        "  bucket {bucket} not empty yet (retry {retries}/{}), retrying in {:.1?}...",
                        self.max_retries,
                        self.interval
                    );
                    tokio::time::sleep(self.interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucket_relocate_gateway::memory::{GatewayCall, MemoryGateway};
    use bucket_relocate_models::Versioning;

    fn delete_calls(gw: &MemoryGateway) -> usize {
        gw.calls()
            .iter()
            .filter(|c| matches!(c, GatewayCall::DeleteBucket { .. }))
            .count()
    }

    #[test]
    fn default_schedule_is_five_seconds_times_twenty_four() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert_eq!(policy.max_retries, 24);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_not_empty() {
        for failures in [0u32, 1, 7, 23] {
            let gw = MemoryGateway::new();
            gw.insert_bucket("demo", Versioning::Disabled);
            gw.fail_delete_not_empty("demo", failures);

            let start = tokio::time::Instant::now();
            let retries = RetryPolicy::default()
                .delete_bucket(&gw, "demo")
                .await
                .unwrap();

            assert_eq!(retries, failures);
            assert_eq!(start.elapsed(), Duration::from_secs(5 * u64::from(failures)));
            assert_eq!(delete_calls(&gw), failures as usize + 1);
            assert!(!gw.has_bucket("demo"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_exactly_max_retries() {
        let gw = MemoryGateway::new();
        gw.insert_bucket("demo", Versioning::Disabled);
        gw.fail_delete_not_empty("demo", 25);

        let start = tokio::time::Instant::now();
        let err = RetryPolicy::default()
            .delete_bucket(&gw, "demo")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RelocateError::DeleteRetriesExhausted { ref bucket, retries: 24 } if bucket == "demo"
        ));
        assert_eq!(delete_calls(&gw), 25);
        assert_eq!(start.elapsed(), Duration::from_secs(5 * 24));
        assert!(gw.has_bucket("demo"));
    }

    #[tokio::test(start_paused = true)]
    async fn other_failures_are_not_retried() {
        let gw = MemoryGateway::new();

        let start = tokio::time::Instant::now();
        let err = RetryPolicy::default()
            .delete_bucket(&gw, "missing")
            .await
            .unwrap_err();

        assert!(matches!(err, RelocateError::Gateway(ref e) if e.is_not_found()));
        assert_eq!(delete_calls(&gw), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
