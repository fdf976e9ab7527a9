//! Stage orchestrator.
//!
//! Buckets are processed strictly one after another. For each bucket the
//! steps of the requested stage run in order; steps at or below the
//! bucket's last recorded step are skipped without touching the backend.

use std::path::PathBuf;
use std::sync::Arc;

use bucket_relocate_gateway::StorageGateway;
use bucket_relocate_gateway::progress::{ProgressCallback, null_progress};
use bucket_relocate_models::{
    BucketState, CopyRequest, MetadataSnapshot, MigrationJob, RelocationTarget, Stage,
    StageSelection, Step, Versioning,
};
use bucket_relocate_state::archive::archive_completed;
use bucket_relocate_state::ledger::StepLedger;
use bucket_relocate_state::manifest::ManifestLog;
use bucket_relocate_state::paths::StatePaths;
use bucket_relocate_state::snapshot::SnapshotStore;

use crate::{RelocateConfig, RelocateError, RetryPolicy, metadata, validation};

/// Outcome of a successful [`Relocator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Requested buckets that have reached the final step.
    pub completed: Vec<String>,
    /// State files renamed by completion archival. Empty unless every
    /// requested bucket completed.
    pub archived: Vec<PathBuf>,
}

/// Drives migration jobs through their steps.
pub struct Relocator {
    gateway: Arc<dyn StorageGateway>,
    config: RelocateConfig,
    paths: StatePaths,
    ledger: StepLedger,
    manifest: ManifestLog,
    snapshots: SnapshotStore,
    retry: RetryPolicy,
    progress: Arc<dyn ProgressCallback>,
}

impl Relocator {
    /// Opens the state directory named by `config` and replays its ledger.
    ///
    /// # Errors
    ///
    /// Returns [`RelocateError`] if the configuration is invalid or the
    /// state directory or ledger cannot be read.
    pub fn open(
        gateway: Arc<dyn StorageGateway>,
        config: RelocateConfig,
    ) -> Result<Self, RelocateError> {
        config.validate()?;
        let paths = StatePaths::new(&config.state_dir);
        paths.ensure()?;
        let ledger = StepLedger::open(paths.ledger())?;
        log::debug!("Using state directory {}", paths.root().display());

        Ok(Self {
            gateway,
            manifest: ManifestLog::new(paths.manifest()),
            snapshots: SnapshotStore::new(paths.clone()),
            retry: RetryPolicy::from(&config.retry),
            progress: null_progress(),
            config,
            paths,
            ledger,
        })
    }

    /// Reports bulk copy progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// The replayed step ledger.
    #[must_use]
    pub const fn ledger(&self) -> &StepLedger {
        &self.ledger
    }

    /// The state directory layout.
    #[must_use]
    pub const fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Builds the job for `bucket` using the configured temporary suffix.
    ///
    /// # Errors
    ///
    /// Returns [`RelocateError::InvalidBucketName`] if the bucket or its
    /// temporary name is not a valid bucket name.
    pub fn job(
        &self,
        bucket: &str,
        target: &RelocationTarget,
        verify_read: bool,
    ) -> Result<MigrationJob, RelocateError> {
        Ok(MigrationJob::new(
            bucket,
            &self.config.temp_suffix,
            target.clone(),
            verify_read,
        )?)
    }

    /// Runs the selected stage(s) for every job.
    ///
    /// With [`StageSelection::Both`] the seed stage runs for every bucket
    /// before the cutover starts for any. The cutover first checks every
    /// bucket (seed complete, snapshot present, target consistent) and
    /// fails before any mutation if one is not ready. When every job has
    /// reached the final step, the state files are archived.
    ///
    /// # Errors
    ///
    /// Returns the first failure. Failures inside a step are wrapped in
    /// [`RelocateError::Step`].
    pub async fn run(
        &mut self,
        jobs: &[MigrationJob],
        selection: StageSelection,
    ) -> Result<RunSummary, RelocateError> {
        for &stage in selection.stages() {
            log::info!("Starting {stage} stage for {} bucket(s)", jobs.len());
            match stage {
                Stage::Seed => {
                    for job in jobs {
                        self.run_stage(job, stage, None).await?;
                    }
                }
                Stage::Cutover => {
                    let prepared = self.prepare_cutover(jobs)?;
                    for (job, snapshot) in &prepared {
                        self.run_stage(job, stage, Some(snapshot)).await?;
                    }
                }
            }
        }

        self.finish(jobs)
    }

    /// Checks every job before the cutover touches anything and resolves
    /// each job's target against the one recorded by the seed stage.
    fn prepare_cutover(
        &self,
        jobs: &[MigrationJob],
    ) -> Result<Vec<(MigrationJob, MetadataSnapshot)>, RelocateError> {
        let mut prepared = Vec::with_capacity(jobs.len());
        for job in jobs {
            let last_step = self.ledger.last_completed_step(&job.source);
            if last_step < Step::SEED_COMPLETE.number() {
                return Err(RelocateError::StageOneIncomplete {
                    bucket: job.source.clone(),
                    last_step,
                });
            }

            let snapshot =
                self.snapshots
                    .load(&job.source)?
                    .ok_or_else(|| RelocateError::SnapshotMissing {
                        bucket: job.source.clone(),
                    })?;
            let target = resolve_target(&job.source, &job.target, &snapshot.target)?;
            if target != job.target {
                log::info!("Using target recorded by the seed stage for {}: {target}", job.source);
            }

            prepared.push((
                MigrationJob {
                    target,
                    ..job.clone()
                },
                snapshot,
            ));
        }
        Ok(prepared)
    }

    async fn run_stage(
        &mut self,
        job: &MigrationJob,
        stage: Stage,
        snapshot: Option<&MetadataSnapshot>,
    ) -> Result<(), RelocateError> {
        for &step in stage.steps() {
            let last = self.ledger.last_completed_step(&job.source);
            if step.number() <= last {
                log::debug!(
                    "Step {}/{}: {} [{}] already complete, skipping",
                    step.number(),
                    Step::FINAL.number(),
                    step.label(),
                    job.source
                );
                continue;
            }

            log::info!(
                "Step {}/{}: {} [{}]",
                step.number(),
                Step::FINAL.number(),
                step.label(),
                job.source
            );

            let result = match self.execute(job, step, snapshot).await {
                Ok(()) => self
                    .ledger
                    .record_step_complete(step.number(), &job.source)
                    .map_err(RelocateError::from),
                Err(e) => Err(e),
            };
            result.map_err(|source| RelocateError::Step {
                bucket: job.source.clone(),
                step,
                source: Box::new(source),
            })?;
        }

        log::info!(
            "Bucket {} is now {}",
            job.source,
            BucketState::from_last_step(self.ledger.last_completed_step(&job.source))
        );
        Ok(())
    }

    async fn execute(
        &self,
        job: &MigrationJob,
        step: Step,
        snapshot: Option<&MetadataSnapshot>,
    ) -> Result<(), RelocateError> {
        let gateway = self.gateway.as_ref();
        let source = job.source.as_str();
        let temp = job.temp.as_str();

        match step {
            Step::CheckExists => validation::check_exists(gateway, source).await,
            Step::CheckReadable => {
                if job.verify_read {
                    validation::check_readable(
                        gateway,
                        source,
                        self.config.validation.fail_on_unreadable,
                    )
                    .await?;
                } else {
                    log::info!("  read verification not requested");
                }
                Ok(())
            }
            Step::CheckWritable => {
                validation::check_writable(gateway, source).await?;
                Ok(())
            }
            Step::CreateTempBucket => self.create_temp_bucket(job).await,
            Step::MirrorVersioning => {
                if gateway.versioning(source).await?.is_enabled() {
                    gateway.set_versioning(temp, Versioning::Enabled).await?;
                    log::info!("  enabled versioning on {temp}");
                } else {
                    log::info!("  {source} is not versioned");
                }
                Ok(())
            }
            Step::SeedCopy | Step::CatchUpCopy => self.copy(source, temp, job).await,
            Step::SnapshotMetadata => {
                let snapshot = metadata::capture(gateway, source, &job.target).await?;
                self.snapshots.save(&snapshot)?;
                Ok(())
            }
            Step::PurgeSource => self.purge(source).await,
            Step::DeleteSource => self.delete_bucket(source).await,
            Step::RecreateSource => match gateway.create_bucket(source, &job.target).await {
                Ok(()) => {
                    log::info!("  recreated {source} ({})", job.target);
                    Ok(())
                }
                Err(e) if e.is_already_owned() => {
                    log::warn!("  {source} already exists and is ours, an earlier run created it");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            Step::RestoreMetadata => {
                let snapshot = snapshot.ok_or_else(|| RelocateError::SnapshotMissing {
                    bucket: source.to_string(),
                })?;
                metadata::restore(gateway, source, snapshot).await
            }
            Step::CopyBack => self.copy(temp, source, job).await,
            Step::PurgeTemp => self.purge(temp).await,
            Step::DeleteTemp => self.delete_bucket(temp).await,
        }
    }

    async fn create_temp_bucket(&self, job: &MigrationJob) -> Result<(), RelocateError> {
        let exists = || RelocateError::TempBucketExists {
            bucket: job.source.clone(),
            temp: job.temp.clone(),
        };

        if self.gateway.bucket_exists(&job.temp).await? {
            return Err(exists());
        }
        match self.gateway.create_bucket(&job.temp, &job.target).await {
            Ok(()) => {
                log::info!("  created {} ({})", job.temp, job.target);
                Ok(())
            }
            Err(e) if e.is_already_exists() || e.is_already_owned() => Err(exists()),
            Err(e) => Err(e.into()),
        }
    }

    /// Bulk copies `from` into `to`, one version at a time, oldest first,
    /// when `from` is versioned.
    async fn copy(&self, from: &str, to: &str, job: &MigrationJob) -> Result<(), RelocateError> {
        let ordered = self.gateway.versioning(from).await?.is_enabled();
        let request = CopyRequest {
            source_bucket: from.to_string(),
            dest_bucket: to.to_string(),
            preserve_metadata: true,
            ordered,
            storage_class: job.target.storage_class.clone(),
            concurrency: if ordered {
                1
            } else {
                self.config.copy.concurrency
            },
        };

        log::info!(
            "  copying {from} -> {to} ({})",
            if ordered {
                "all versions, sequential"
            } else {
                "current versions, parallel"
            }
        );
        self.progress.set_message(format!("{from} -> {to}"));
        let report = self
            .gateway
            .copy_objects(&request, self.progress.as_ref())
            .await?;
        self.progress.finish(format!("{from} -> {to}: {report}"));

        self.manifest.append(from, to, &report)?;
        log::info!("  {report}");
        Ok(())
    }

    async fn purge(&self, bucket: &str) -> Result<(), RelocateError> {
        let deleted = self.gateway.delete_objects(bucket, None, true).await?;
        log::info!("  deleted {deleted} object version(s) from {bucket}");
        Ok(())
    }

    /// A bucket that is already gone counts as deleted: an earlier run may
    /// have deleted it without getting to record the step.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), RelocateError> {
        match self.retry.delete_bucket(self.gateway.as_ref(), bucket).await {
            Ok(_) => log::info!("  deleted bucket {bucket}"),
            Err(RelocateError::Gateway(e)) if e.is_not_found() => {
                log::warn!("  bucket {bucket} no longer exists, treating it as deleted");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn finish(&mut self, jobs: &[MigrationJob]) -> Result<RunSummary, RelocateError> {
        let completed: Vec<String> = jobs
            .iter()
            .filter(|job| self.ledger.last_completed_step(&job.source) >= Step::FINAL.number())
            .map(|job| job.source.clone())
            .collect();

        if jobs.is_empty() || completed.len() < jobs.len() {
            return Ok(RunSummary {
                completed,
                archived: Vec::new(),
            });
        }

        log::info!(
            "All {} bucket(s) relocated, archiving state in {}",
            completed.len(),
            self.paths.root().display()
        );
        let archived = archive_completed(
            &self.paths,
            &mut self.ledger,
            &completed,
            chrono::Utc::now(),
        )?;
        Ok(RunSummary {
            completed,
            archived,
        })
    }
}

/// Merges the target requested for a cutover with the one recorded by the
/// seed stage. Unset fields fall back to the recorded value; set fields
/// must match it.
fn resolve_target(
    bucket: &str,
    requested: &RelocationTarget,
    recorded: &RelocationTarget,
) -> Result<RelocationTarget, RelocateError> {
    let conflicts = |requested: &Option<String>, recorded: &Option<String>| {
        requested.is_some() && requested != recorded
    };

    if conflicts(&requested.location, &recorded.location)
        || conflicts(&requested.storage_class, &recorded.storage_class)
    {
        return Err(RelocateError::TargetMismatch {
            bucket: bucket.to_string(),
            recorded: recorded.clone(),
            requested: requested.clone(),
        });
    }
    Ok(recorded.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucket_relocate_gateway::memory::{GatewayCall, MemoryGateway, ObjectData};
    use bucket_relocate_models::DEFAULT_TEMP_SUFFIX;

    struct Harness {
        dir: tempfile::TempDir,
        gw: Arc<MemoryGateway>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                gw: Arc::new(MemoryGateway::new()),
            }
        }

        fn relocator(&self) -> Relocator {
            let config = RelocateConfig {
                state_dir: self.dir.path().to_path_buf(),
                ..RelocateConfig::default()
            };
            Relocator::open(self.gw.clone(), config).unwrap()
        }

        fn paths(&self) -> StatePaths {
            StatePaths::new(self.dir.path())
        }

        fn mutating_calls(&self) -> Vec<GatewayCall> {
            self.gw
                .calls()
                .into_iter()
                .filter(GatewayCall::is_mutating)
                .collect()
        }

        fn demo_bucket(&self) {
            self.gw.insert_bucket("demo", Versioning::Disabled);
            self.gw.put(
                "demo",
                "index.html",
                ObjectData::new("<h1>demo</h1>")
                    .with_content_type("text/html")
                    .with_metadata("author", "ops"),
            );
            self.gw.put(
                "demo",
                "data/rows.csv",
                ObjectData::new("a,b\n1,2\n").with_content_type("text/csv"),
            );
            self.gw.put(
                "demo",
                "logo.png",
                ObjectData::new(vec![0x89, b'P', b'N', b'G']).with_acl("public-read"),
            );
        }
    }

    fn job(bucket: &str, target: RelocationTarget) -> MigrationJob {
        MigrationJob::new(bucket, DEFAULT_TEMP_SUFFIX, target, false).unwrap()
    }

    fn target(location: &str, class: &str) -> RelocationTarget {
        RelocationTarget {
            location: Some(location.to_string()),
            storage_class: Some(class.to_string()),
        }
    }

    #[tokio::test]
    async fn both_stages_relocate_demo_in_place() {
        let h = Harness::new();
        h.demo_bucket();
        let before = h.gw.bucket("demo").unwrap();

        let summary = h
            .relocator()
            .run(&[job("demo", target("eu-west-1", "COLDLINE"))], StageSelection::Both)
            .await
            .unwrap();

        assert_eq!(summary.completed, vec!["demo".to_string()]);
        assert!(!h.gw.has_bucket("demo-relocate"));

        let after = h.gw.bucket("demo").unwrap();
        assert_eq!(after.location.as_deref(), Some("eu-west-1"));
        assert_eq!(after.storage_class.as_deref(), Some("COLDLINE"));
        assert_eq!(after.current_keys(), before.current_keys());
        for key in before.current_keys() {
            let old = before.current(&key).unwrap();
            let new = after.current(&key).unwrap();
            assert_eq!(new.content, old.content, "{key}");
            assert_eq!(new.content_type, old.content_type, "{key}");
            assert_eq!(new.metadata, old.metadata, "{key}");
            assert_eq!(new.acl, old.acl, "{key}");
            assert_eq!(new.storage_class.as_deref(), Some("COLDLINE"), "{key}");
        }
    }

    #[tokio::test]
    async fn completion_archives_state_and_next_run_starts_fresh() {
        let h = Harness::new();
        h.demo_bucket();
        let paths = h.paths();
        std::fs::write(paths.debug_log(), "earlier output\n").unwrap();

        let summary = h
            .relocator()
            .run(&[job("demo", RelocationTarget::default())], StageSelection::Both)
            .await
            .unwrap();

        assert_eq!(summary.archived.len(), 4);
        assert!(summary.archived.iter().all(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(".completed-"))
        }));
        assert!(!paths.ledger().exists());
        assert!(!paths.manifest().exists());
        assert!(!paths.debug_log().exists());
        assert!(!paths.snapshot("demo").exists());

        let mut again = h.relocator();
        assert_eq!(again.ledger().last_completed_step("demo"), 0);

        h.gw.clear_calls();
        again
            .run(&[job("demo", RelocationTarget::default())], StageSelection::Seed)
            .await
            .unwrap();
        assert_eq!(
            h.gw.calls().first(),
            Some(&GatewayCall::BucketExists {
                bucket: "demo".to_string()
            })
        );
        assert!(h.gw.has_bucket("demo-relocate"));
        assert_eq!(again.ledger().last_completed_step("demo"), 7);
    }

    #[tokio::test]
    async fn rerunning_a_finished_stage_makes_no_calls() {
        let h = Harness::new();
        h.demo_bucket();
        let jobs = [job("demo", RelocationTarget::default())];

        h.relocator().run(&jobs, StageSelection::Seed).await.unwrap();
        let ledger_before = std::fs::read_to_string(h.paths().ledger()).unwrap();

        h.gw.clear_calls();
        h.relocator().run(&jobs, StageSelection::Seed).await.unwrap();

        assert!(h.gw.calls().is_empty());
        assert_eq!(
            std::fs::read_to_string(h.paths().ledger()).unwrap(),
            ledger_before
        );
    }

    #[tokio::test]
    async fn interrupted_after_temp_creation_resumes_at_copy() {
        let h = Harness::new();
        h.demo_bucket();
        {
            let mut ledger = StepLedger::open(h.paths().ledger()).unwrap();
            for step in 1..=Step::CreateTempBucket.number() {
                ledger.record_step_complete(step, "demo").unwrap();
            }
        }
        h.gw.insert_bucket("demo-relocate", Versioning::Disabled);

        let mut relocator = h.relocator();
        relocator
            .run(&[job("demo", RelocationTarget::default())], StageSelection::Seed)
            .await
            .unwrap();

        let calls = h.gw.calls();
        assert!(!calls.iter().any(|c| matches!(
            c,
            GatewayCall::CreateBucket { .. }
                | GatewayCall::BucketExists { .. }
                | GatewayCall::WriteObject { .. }
        )));
        assert_eq!(
            h.mutating_calls().first(),
            Some(&GatewayCall::CopyObjects {
                source: "demo".to_string(),
                dest: "demo-relocate".to_string(),
                ordered: false,
            })
        );
        assert_eq!(h.gw.bucket("demo-relocate").unwrap().current_keys().len(), 3);
        assert_eq!(relocator.ledger().last_completed_step("demo"), 7);
    }

    #[tokio::test]
    async fn failed_copy_reports_step_and_resume_skips_bucket_creation() {
        let h = Harness::new();
        h.demo_bucket();
        h.gw.fail_copies_into("demo-relocate");
        let jobs = [job("demo", RelocationTarget::default())];

        let err = h
            .relocator()
            .run(&jobs, StageSelection::Seed)
            .await
            .unwrap_err();
        assert_eq!(err.last_attempted_step(), Some(("demo", Step::SeedCopy)));
        assert!(err.to_string().starts_with("Step 6 (copy objects to temporary bucket)"));

        h.gw.clear_faults();
        h.gw.clear_calls();
        let mut relocator = h.relocator();
        assert_eq!(relocator.ledger().last_completed_step("demo"), 5);
        relocator.run(&jobs, StageSelection::Seed).await.unwrap();

        assert!(
            !h.gw
                .calls()
                .iter()
                .any(|c| matches!(c, GatewayCall::CreateBucket { .. }))
        );
        assert_eq!(relocator.ledger().last_completed_step("demo"), 7);
    }

    #[tokio::test]
    async fn cutover_before_seed_completes_mutates_nothing() {
        let h = Harness::new();
        h.demo_bucket();
        h.gw.insert_bucket("beta", Versioning::Disabled);
        h.gw.put("beta", "x", ObjectData::new("x"));

        h.relocator()
            .run(&[job("demo", RelocationTarget::default())], StageSelection::Seed)
            .await
            .unwrap();
        h.gw.fail_copies_into("beta-relocate");
        h.relocator()
            .run(&[job("beta", RelocationTarget::default())], StageSelection::Seed)
            .await
            .unwrap_err();
        h.gw.clear_faults();
        h.gw.clear_calls();

        let err = h
            .relocator()
            .run(
                &[
                    job("demo", RelocationTarget::default()),
                    job("beta", RelocationTarget::default()),
                ],
                StageSelection::Cutover,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RelocateError::StageOneIncomplete { ref bucket, last_step: 5 } if bucket == "beta"
        ));
        assert!(h.mutating_calls().is_empty());
        assert!(h.gw.has_bucket("demo"));
    }

    #[tokio::test]
    async fn versioned_history_keeps_relative_order() {
        let h = Harness::new();
        h.gw.insert_bucket("docs", Versioning::Enabled);
        for content in ["one", "two", "three"] {
            h.gw.put("docs", "report", ObjectData::new(content));
        }
        h.gw.put("docs", "scratch", ObjectData::new("tmp"));
        h.gw.remove("docs", "scratch");
        let original_ids: Vec<String> = h.gw.bucket("docs").unwrap().objects["report"]
            .iter()
            .map(|v| v.version_id.clone())
            .collect();

        let jobs = [job("docs", RelocationTarget::default())];
        h.relocator().run(&jobs, StageSelection::Seed).await.unwrap();
        h.gw.put("docs", "report", ObjectData::new("four"));
        h.relocator().run(&jobs, StageSelection::Cutover).await.unwrap();

        let after = h.gw.bucket("docs").unwrap();
        assert!(after.versioning.is_enabled());
        let history: Vec<&[u8]> = after.objects["report"]
            .iter()
            .map(|v| v.content.as_slice())
            .collect();
        assert_eq!(
            history,
            vec![&b"one"[..], &b"two"[..], &b"three"[..], &b"four"[..]]
        );
        assert!(
            after.objects["report"]
                .iter()
                .all(|v| !original_ids.contains(&v.version_id))
        );
        let scratch = &after.objects["scratch"];
        assert_eq!(scratch.len(), 2);
        assert!(scratch[1].delete_marker);

        assert!(h.gw.calls().iter().all(|c| match c {
            GatewayCall::CopyObjects { ordered, .. } => *ordered,
            _ => true,
        }));
    }

    #[tokio::test]
    async fn cutover_uses_recorded_target_and_rejects_conflicts() {
        let h = Harness::new();
        h.demo_bucket();
        h.relocator()
            .run(&[job("demo", target("eu", "ARCHIVE"))], StageSelection::Seed)
            .await
            .unwrap();
        h.gw.clear_calls();

        let conflicting = RelocationTarget {
            location: Some("us".to_string()),
            storage_class: None,
        };
        let err = h
            .relocator()
            .run(&[job("demo", conflicting)], StageSelection::Cutover)
            .await
            .unwrap_err();
        assert!(matches!(err, RelocateError::TargetMismatch { .. }));
        assert!(h.mutating_calls().is_empty());

        h.relocator()
            .run(&[job("demo", RelocationTarget::default())], StageSelection::Cutover)
            .await
            .unwrap();
        let after = h.gw.bucket("demo").unwrap();
        assert_eq!(after.location.as_deref(), Some("eu"));
        assert_eq!(after.storage_class.as_deref(), Some("ARCHIVE"));
    }

    #[tokio::test(start_paused = true)]
    async fn cutover_waits_out_not_empty_source() {
        let h = Harness::new();
        h.demo_bucket();
        let jobs = [job("demo", RelocationTarget::default())];
        h.relocator().run(&jobs, StageSelection::Seed).await.unwrap();

        h.gw.fail_delete_not_empty("demo", 3);
        h.gw.clear_calls();
        h.relocator().run(&jobs, StageSelection::Cutover).await.unwrap();

        let source_deletes = h
            .gw
            .calls()
            .iter()
            .filter(|c| {
                matches!(c, GatewayCall::DeleteBucket { bucket } if bucket == "demo")
            })
            .count();
        assert_eq!(source_deletes, 4);
        assert!(!h.gw.has_bucket("demo-relocate"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_delete_retries_park_the_bucket() {
        let h = Harness::new();
        h.demo_bucket();
        let jobs = [job("demo", RelocationTarget::default())];
        h.relocator().run(&jobs, StageSelection::Seed).await.unwrap();

        h.gw.fail_delete_not_empty("demo", 25);
        let err = h
            .relocator()
            .run(&jobs, StageSelection::Cutover)
            .await
            .unwrap_err();
        assert_eq!(err.last_attempted_step(), Some(("demo", Step::DeleteSource)));
        assert!(matches!(
            err,
            RelocateError::Step { ref source, .. }
                if matches!(**source, RelocateError::DeleteRetriesExhausted { retries: 24, .. })
        ));

        h.gw.clear_faults();
        h.gw.clear_calls();
        let mut relocator = h.relocator();
        assert_eq!(relocator.ledger().last_completed_step("demo"), 9);
        relocator.run(&jobs, StageSelection::Cutover).await.unwrap();
        assert!(!h.gw.calls().contains(&GatewayCall::DeleteObjects {
            bucket: "demo".to_string(),
            prefix: None,
            all_versions: true,
        }));
        assert_eq!(h.gw.bucket("demo").unwrap().current_keys().len(), 3);
    }

    #[tokio::test]
    async fn missing_source_fails_at_first_step() {
        let h = Harness::new();

        let err = h
            .relocator()
            .run(&[job("demo", RelocationTarget::default())], StageSelection::Seed)
            .await
            .unwrap_err();

        assert_eq!(err.last_attempted_step(), Some(("demo", Step::CheckExists)));
        assert!(h.mutating_calls().is_empty());
        assert_eq!(
            StepLedger::open(h.paths().ledger())
                .unwrap()
                .last_completed_step("demo"),
            0
        );
    }

    #[tokio::test]
    async fn existing_temp_bucket_is_fatal() {
        let h = Harness::new();
        h.demo_bucket();
        h.gw.insert_bucket("demo-relocate", Versioning::Disabled);

        let err = h
            .relocator()
            .run(&[job("demo", RelocationTarget::default())], StageSelection::Seed)
            .await
            .unwrap_err();

        assert_eq!(err.last_attempted_step(), Some(("demo", Step::CreateTempBucket)));
        assert!(!h.gw.calls().iter().any(|c| matches!(
            c,
            GatewayCall::CreateBucket { .. } | GatewayCall::CopyObjects { .. }
        )));
    }

    #[tokio::test]
    async fn archival_carries_unfinished_buckets_forward() {
        let h = Harness::new();
        h.demo_bucket();
        h.gw.insert_bucket("beta", Versioning::Disabled);
        h.relocator()
            .run(
                &[
                    job("demo", RelocationTarget::default()),
                    job("beta", RelocationTarget::default()),
                ],
                StageSelection::Seed,
            )
            .await
            .unwrap();

        let summary = h
            .relocator()
            .run(&[job("demo", RelocationTarget::default())], StageSelection::Cutover)
            .await
            .unwrap();
        assert!(!summary.archived.is_empty());

        let relocator = h.relocator();
        assert_eq!(relocator.ledger().last_completed_step("demo"), 0);
        assert_eq!(relocator.ledger().last_completed_step("beta"), 7);
        assert!(h.paths().snapshot("beta").exists());
        assert!(!h.paths().snapshot("demo").exists());
    }

    #[test]
    fn unset_target_fields_fall_back_to_recorded() {
        let recorded = target("eu", "ARCHIVE");
        let requested = RelocationTarget {
            location: Some("eu".to_string()),
            storage_class: None,
        };
        assert_eq!(resolve_target("demo", &requested, &recorded).unwrap(), recorded);
        assert!(resolve_target("demo", &target("eu", "COLD"), &recorded).is_err());
        assert!(
            resolve_target("demo", &requested, &RelocationTarget::default()).is_err(),
            "a location the seed stage did not use is a conflict"
        );
    }

    /// Seeds `demo`, then replays a cutover that got through `done` (steps
    /// 8 onwards) against the backend without recording anything past 9.
    async fn crashed_cutover(h: &Harness, done: Step) {
        h.demo_bucket();
        h.relocator()
            .run(&[job("demo", RelocationTarget::default())], StageSelection::Seed)
            .await
            .unwrap();

        let mut ledger = StepLedger::open(h.paths().ledger()).unwrap();
        ledger
            .record_step_complete(Step::PurgeSource.number(), "demo")
            .unwrap();
        h.gw.delete_objects("demo", None, true).await.unwrap();
        h.gw.delete_bucket("demo").await.unwrap();
        if done == Step::RecreateSource {
            ledger
                .record_step_complete(Step::DeleteSource.number(), "demo")
                .unwrap();
            h.gw.create_bucket("demo", &RelocationTarget::default())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn source_deleted_before_recording_is_not_deleted_again() {
        let h = Harness::new();
        crashed_cutover(&h, Step::DeleteSource).await;

        let summary = h
            .relocator()
            .run(&[job("demo", RelocationTarget::default())], StageSelection::Cutover)
            .await
            .unwrap();

        assert_eq!(summary.completed, vec!["demo".to_string()]);
        assert_eq!(h.gw.bucket("demo").unwrap().current_keys().len(), 3);
        assert!(!h.gw.has_bucket("demo-relocate"));
    }

    #[tokio::test]
    async fn source_recreated_before_recording_is_reused() {
        let h = Harness::new();
        crashed_cutover(&h, Step::RecreateSource).await;
        h.gw.clear_calls();

        let summary = h
            .relocator()
            .run(&[job("demo", RelocationTarget::default())], StageSelection::Cutover)
            .await
            .unwrap();

        assert_eq!(summary.completed, vec!["demo".to_string()]);
        assert_eq!(h.gw.bucket("demo").unwrap().current_keys().len(), 3);
        assert!(
            !h.gw
                .calls()
                .iter()
                .any(|c| matches!(c, GatewayCall::DeleteBucket { bucket } if bucket == "demo"))
        );
    }

    #[tokio::test]
    async fn temp_deleted_before_recording_still_completes() {
        let h = Harness::new();
        h.demo_bucket();
        let jobs = [job("demo", RelocationTarget::default())];
        h.relocator().run(&jobs, StageSelection::Seed).await.unwrap();
        {
            let mut ledger = StepLedger::open(h.paths().ledger()).unwrap();
            for step in Step::CatchUpCopy.number()..Step::DeleteTemp.number() {
                ledger.record_step_complete(step, "demo").unwrap();
            }
        }
        h.gw.delete_objects("demo-relocate", None, true).await.unwrap();
        h.gw.delete_bucket("demo-relocate").await.unwrap();

        let summary = h.relocator().run(&jobs, StageSelection::Cutover).await.unwrap();
        assert_eq!(summary.completed, vec!["demo".to_string()]);
        assert_eq!(summary.archived.len(), 3);
    }

    #[tokio::test]
    async fn recreate_fails_when_another_account_took_the_name() {
        let h = Harness::new();
        crashed_cutover(&h, Step::DeleteSource).await;
        {
            let mut ledger = StepLedger::open(h.paths().ledger()).unwrap();
            ledger
                .record_step_complete(Step::DeleteSource.number(), "demo")
                .unwrap();
        }
        h.gw.claim_name_elsewhere("demo");

        let err = h
            .relocator()
            .run(&[job("demo", RelocationTarget::default())], StageSelection::Cutover)
            .await
            .unwrap_err();

        assert_eq!(err.last_attempted_step(), Some(("demo", Step::RecreateSource)));
        assert_eq!(
            h.gw.bucket("demo-relocate").unwrap().current_keys().len(),
            3,
            "data stays in the temporary bucket"
        );
    }
}
