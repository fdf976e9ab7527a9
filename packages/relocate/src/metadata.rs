//! Capture and restore of bucket-level configuration.
//!
//! The snapshot is taken at the end of the seed stage, persisted by the
//! state crate, and applied to the recreated source bucket during the
//! cutover.

use bucket_relocate_gateway::StorageGateway;
use bucket_relocate_models::{MetadataSnapshot, RelocationTarget, Versioning};

use crate::RelocateError;

/// Reads every bucket-level configuration document of `bucket`.
///
/// `target` is recorded alongside so the cutover can run without repeating
/// the location and storage class.
///
/// # Errors
///
/// Returns [`RelocateError::Gateway`] if any document cannot be read.
pub async fn capture(
    gateway: &dyn StorageGateway,
    bucket: &str,
    target: &RelocationTarget,
) -> Result<MetadataSnapshot, RelocateError> {
    let snapshot = MetadataSnapshot {
        bucket: bucket.to_string(),
        captured_at: chrono::Utc::now(),
        target: target.clone(),
        acl: gateway.bucket_acl(bucket).await?,
        website: gateway.website(bucket).await?,
        logging: gateway.logging(bucket).await?,
        cors: gateway.cors(bucket).await?,
        versioning: gateway.versioning(bucket).await?,
    };

    log::info!(
        "  captured metadata for {bucket}: {} grant(s), website={}, logging={}, {} CORS rule(s), versioning={}",
        snapshot.acl.grants.len(),
        snapshot.website.is_configured(),
        snapshot.logging.is_configured(),
        snapshot.cors.len(),
        snapshot.versioning
    );
    Ok(snapshot)
}

/// Applies `snapshot` to `bucket`.
///
/// The ACL and CORS rules are always written. The website configuration
/// is written only if it names a main page suffix or a not-found page,
/// logging only if it names both a log bucket and a prefix, and versioning
/// only if the snapshot had it enabled.
///
/// # Errors
///
/// Returns [`RelocateError::Gateway`] if any document cannot be written.
pub async fn restore(
    gateway: &dyn StorageGateway,
    bucket: &str,
    snapshot: &MetadataSnapshot,
) -> Result<(), RelocateError> {
    gateway.set_bucket_acl(bucket, &snapshot.acl).await?;

    if snapshot.website.is_configured() {
        gateway.set_website(bucket, &snapshot.website).await?;
        log::info!("  restored website configuration on {bucket}");
    }

    if snapshot.logging.is_configured() {
        gateway.set_logging(bucket, &snapshot.logging).await?;
        log::info!("  restored access logging on {bucket}");
    }

    gateway.set_cors(bucket, &snapshot.cors).await?;

    if snapshot.versioning.is_enabled() {
        gateway.set_versioning(bucket, Versioning::Enabled).await?;
        log::info!("  re-enabled versioning on {bucket}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucket_relocate_gateway::memory::{GatewayCall, MemoryGateway, MetadataDocument};
    use bucket_relocate_models::{
        AclDocument, CorsRule, Grant, Grantee, LoggingConfig, WebsiteConfig,
    };

    fn configured_source(gw: &MemoryGateway) {
        gw.insert_bucket("demo", Versioning::Enabled);
        gw.update_bucket("demo", |b| {
            b.acl = AclDocument {
                owner: Some(Grantee {
                    kind: "CanonicalUser".to_string(),
                    id: Some("owner-id".to_string()),
                    ..Grantee::default()
                }),
                grants: vec![Grant {
                    grantee: Grantee {
                        kind: "Group".to_string(),
                        uri: Some("http://acs.amazonaws.com/groups/global/AllUsers".to_string()),
                        ..Grantee::default()
                    },
                    permission: "READ".to_string(),
                }],
            };
            b.website = WebsiteConfig {
                main_page_suffix: Some("index.html".to_string()),
                not_found_page: None,
            };
            b.logging = LoggingConfig {
                log_bucket: Some("logs".to_string()),
                log_object_prefix: None,
            };
            b.cors = vec![CorsRule {
                allowed_origins: vec!["*".to_string()],
                allowed_methods: vec!["GET".to_string()],
                ..CorsRule::default()
            }];
        });
    }

    #[tokio::test]
    async fn capture_reads_every_document() {
        let gw = MemoryGateway::new();
        configured_source(&gw);
        let target = RelocationTarget {
            location: Some("eu".to_string()),
            storage_class: None,
        };

        let snapshot = capture(&gw, "demo", &target).await.unwrap();
        assert_eq!(snapshot.bucket, "demo");
        assert_eq!(snapshot.target, target);
        assert_eq!(snapshot.acl.grants.len(), 1);
        assert_eq!(snapshot.website.main_page_suffix.as_deref(), Some("index.html"));
        assert_eq!(snapshot.cors.len(), 1);
        assert_eq!(snapshot.versioning, Versioning::Enabled);
    }

    #[tokio::test]
    async fn restore_applies_only_configured_documents() {
        let gw = MemoryGateway::new();
        configured_source(&gw);
        let snapshot = capture(&gw, "demo", &RelocationTarget::default())
            .await
            .unwrap();

        gw.insert_bucket("fresh", Versioning::Disabled);
        gw.clear_calls();
        restore(&gw, "fresh", &snapshot).await.unwrap();

        let restored = gw.bucket("fresh").unwrap();
        assert_eq!(restored.acl, snapshot.acl);
        assert_eq!(restored.website, snapshot.website);
        assert_eq!(restored.cors, snapshot.cors);
        assert_eq!(restored.versioning, Versioning::Enabled);
        assert_eq!(
            restored.logging,
            LoggingConfig::default(),
            "logging without a prefix is not restored"
        );
        assert!(!gw.calls().contains(&GatewayCall::SetMetadata {
            bucket: "fresh".to_string(),
            document: MetadataDocument::Logging,
        }));
    }

    #[tokio::test]
    async fn disabled_versioning_is_left_alone() {
        let gw = MemoryGateway::new();
        gw.insert_bucket("demo", Versioning::Disabled);
        let snapshot = capture(&gw, "demo", &RelocationTarget::default())
            .await
            .unwrap();

        gw.insert_bucket("fresh", Versioning::Disabled);
        gw.clear_calls();
        restore(&gw, "fresh", &snapshot).await.unwrap();

        assert!(
            !gw.calls()
                .iter()
                .any(|c| matches!(c, GatewayCall::SetVersioning { .. }))
        );
        assert!(
            !gw.calls().contains(&GatewayCall::SetMetadata {
                bucket: "fresh".to_string(),
                document: MetadataDocument::Website,
            })
        );
    }
}
