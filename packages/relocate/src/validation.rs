//! Pre-flight checks run before any destructive step.

use bucket_relocate_gateway::StorageGateway;

use crate::RelocateError;

/// Key prefix of write-permission probe objects.
pub const PROBE_PREFIX: &str = "bucket-relocate-probe-";

/// Fails unless `bucket` exists.
///
/// # Errors
///
/// Returns [`RelocateError::SourceMissing`] if the bucket does not exist,
/// or [`RelocateError::Gateway`] if the check itself fails.
pub async fn check_exists(gateway: &dyn StorageGateway, bucket: &str) -> Result<(), RelocateError> {
    if gateway.bucket_exists(bucket).await? {
        log::info!("  bucket {bucket} exists");
        Ok(())
    } else {
        Err(RelocateError::SourceMissing {
            bucket: bucket.to_string(),
        })
    }
}

/// Reads the metadata of every current object in `bucket` and collects the
/// keys that are access denied.
///
/// Objects uploaded or deleted while the check runs may be missed, so a
/// clean result is best-effort. Objects that vanished between the listing
/// and the read are ignored. With `fail_on_unreadable` unset, unreadable
/// objects are logged and returned instead of failing the run.
///
/// # Errors
///
/// Returns [`RelocateError::UnreadableObjects`] when unreadable objects were
/// found and `fail_on_unreadable` is set, or [`RelocateError::Gateway`] for
/// any other failure.
pub async fn check_readable(
    gateway: &dyn StorageGateway,
    bucket: &str,
    fail_on_unreadable: bool,
) -> Result<Vec<String>, RelocateError> {
    let objects = gateway.list_objects(bucket).await?;
    let mut denied = Vec::new();

    for object in &objects {
        match gateway.head_object(bucket, &object.key).await {
            Ok(()) => {}
            Err(e) if e.is_access_denied() => denied.push(object.key.clone()),
            Err(e) if e.is_not_found() => {
                log::debug!("  {bucket}/{} disappeared during the read check", object.key);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if denied.is_empty() {
        log::info!("  all {} object(s) in {bucket} are readable", objects.len());
        return Ok(denied);
    }

    if fail_on_unreadable {
        return Err(RelocateError::UnreadableObjects {
            bucket: bucket.to_string(),
            keys: denied,
        });
    }

    for key in &denied {
        log::warn!("  {bucket}/{key} is not readable and will not be copied");
    }
    Ok(denied)
}

/// Writes a uniquely named probe object into `bucket` and deletes every
/// version of it again.
///
/// Returns the probe key.
///
/// # Errors
///
/// Returns [`RelocateError::ProbeWrite`] if the write fails, or
/// [`RelocateError::ProbeCleanup`] naming the residual probe if the delete
/// fails.
pub async fn check_writable(
    gateway: &dyn StorageGateway,
    bucket: &str,
) -> Result<String, RelocateError> {
    let probe = format!("{PROBE_PREFIX}{}", uuid::Uuid::new_v4());

    gateway
        .write_object(bucket, &probe, b"bucket relocation write check\n".to_vec())
        .await
        .map_err(|source| RelocateError::ProbeWrite {
            bucket: bucket.to_string(),
            probe: probe.clone(),
            source,
        })?;

    gateway
        .delete_objects(bucket, Some(&probe), true)
        .await
        .map_err(|source| RelocateError::ProbeCleanup {
            bucket: bucket.to_string(),
            probe: probe.clone(),
            source,
        })?;

    log::info!("  bucket {bucket} is writable");
    Ok(probe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucket_relocate_gateway::memory::{MemoryGateway, ObjectData};
    use bucket_relocate_models::Versioning;

    fn gateway_with_objects(versioning: Versioning) -> MemoryGateway {
        let gw = MemoryGateway::new();
        gw.insert_bucket("demo", versioning);
        gw.put("demo", "a", ObjectData::new("alpha"));
        gw.put("demo", "b", ObjectData::new("beta"));
        gw
    }

    #[tokio::test]
    async fn missing_bucket_is_fatal() {
        let gw = MemoryGateway::new();
        let err = check_exists(&gw, "demo").await.unwrap_err();
        assert!(matches!(err, RelocateError::SourceMissing { ref bucket } if bucket == "demo"));
    }

    #[tokio::test]
    async fn unreadable_objects_block_when_configured() {
        let gw = gateway_with_objects(Versioning::Disabled);
        gw.deny_read("demo", "b");

        let err = check_readable(&gw, "demo", true).await.unwrap_err();
        assert!(matches!(err, RelocateError::UnreadableObjects { ref keys, .. } if keys == &["b"]));
    }

    #[tokio::test]
    async fn unreadable_objects_are_advisory_when_configured() {
        let gw = gateway_with_objects(Versioning::Disabled);
        gw.deny_read("demo", "a");

        let denied = check_readable(&gw, "demo", false).await.unwrap();
        assert_eq!(denied, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn probe_leaves_no_versions_behind() {
        let gw = gateway_with_objects(Versioning::Enabled);

        let probe = check_writable(&gw, "demo").await.unwrap();
        assert!(probe.starts_with(PROBE_PREFIX));

        let bucket = gw.bucket("demo").unwrap();
        assert!(!bucket.objects.contains_key(&probe), "no delete marker either");
        assert_eq!(bucket.current_keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn denied_write_is_reported() {
        let gw = gateway_with_objects(Versioning::Disabled);
        gw.deny_writes("demo");

        let err = check_writable(&gw, "demo").await.unwrap_err();
        assert!(matches!(err, RelocateError::ProbeWrite { .. }));
    }

    #[tokio::test]
    async fn failed_cleanup_names_the_residual_probe() {
        let gw = gateway_with_objects(Versioning::Disabled);
        gw.deny_deletes("demo");

        let err = check_writable(&gw, "demo").await.unwrap_err();
        let RelocateError::ProbeCleanup { probe, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert!(gw.bucket("demo").unwrap().current(probe).is_some());
        assert!(err.to_string().contains(probe.as_str()));
    }
}
