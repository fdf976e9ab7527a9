#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for resumable bucket relocation.
//!
//! `run` drives buckets through the seed and/or cutover stage against the
//! configured S3 endpoint. `status` reads the step ledger only. Any fatal
//! error exits with status 1, and the last line written to stderr always
//! names the step that was being attempted.

use std::path::PathBuf;
use std::sync::Arc;

use bucket_relocate::{BucketStatus, RelocateConfig, RelocateError, Relocator};
use bucket_relocate_cli_utils::{CopyProgress, MultiProgress, init_logger};
use bucket_relocate_gateway::s3::S3Gateway;
use bucket_relocate_models::{RelocationTarget, StageSelection};
use bucket_relocate_state::ledger::StepLedger;
use bucket_relocate_state::paths::StatePaths;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "bucket_relocate",
    about = "Move buckets to a new location or storage class, keeping their names"
)]
struct Cli {
    /// TOML configuration file (overrides `BUCKET_RELOCATE_CONFIG`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding the step ledger, manifest, snapshots and debug log
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the seed stage, the cutover stage, or both
    Run {
        /// Which stage(s) to run: `seed`, `cutover` or `both`
        #[arg(long, default_value = "seed")]
        stage: StageSelection,
        /// Target location for the recreated bucket
        #[arg(short = 'l', long)]
        location: Option<String>,
        /// Target storage class for the relocated objects
        #[arg(short = 'c', long)]
        storage_class: Option<String>,
        /// Read every object's metadata before copying
        #[arg(short = 'v', long)]
        verify: bool,
        /// Buckets to relocate, processed in the given order
        #[arg(required = true)]
        buckets: Vec<String>,
    },
    /// Show how far each bucket has progressed
    Status {
        /// Buckets to report on
        #[arg(required = true)]
        buckets: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = RelocateConfig::load(cli.config.as_deref(), cli.state_dir.as_deref());
    let debug_log = config.as_ref().ok().and_then(|config| {
        let paths = StatePaths::new(&config.state_dir);
        paths.ensure().ok().map(|()| paths.debug_log())
    });
    let multi = init_logger(debug_log.as_deref());

    let result = match config {
        Ok(config) => execute(cli.command, config, &multi).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        report(&e);
        std::process::exit(1);
    }
}

async fn execute(
    command: Commands,
    config: RelocateConfig,
    multi: &MultiProgress,
) -> Result<(), RelocateError> {
    match command {
        Commands::Run {
            stage,
            location,
            storage_class,
            verify,
            buckets,
        } => {
            let gateway = S3Gateway::connect(&config.s3).await;
            let mut relocator =
                Relocator::open(Arc::new(gateway), config)?.with_progress(CopyProgress::new(multi));
            log::debug!("State directory {}", relocator.paths().root().display());

            let target = RelocationTarget {
                location,
                storage_class,
            };
            let jobs = dedup(buckets)
                .iter()
                .map(|bucket| relocator.job(bucket, &target, verify))
                .collect::<Result<Vec<_>, _>>()?;

            let summary = relocator.run(&jobs, stage).await?;

            for job in jobs.iter().filter(|job| !summary.completed.contains(&job.source)) {
                log::info!("{}", BucketStatus::from_ledger(relocator.ledger(), &job.source));
            }
            for path in &summary.archived {
                log::info!("Archived {}", path.display());
            }
        }
        Commands::Status { buckets } => {
            let paths = StatePaths::new(&config.state_dir);
            let ledger = StepLedger::open(paths.ledger())?;
            for bucket in dedup(buckets) {
                println!("{}", BucketStatus::from_ledger(&ledger, &bucket));
            }
        }
    }

    Ok(())
}

/// Drops repeated bucket operands, keeping the first occurrence.
fn dedup(buckets: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        if unique.contains(&bucket) {
            log::warn!("Ignoring repeated bucket {bucket}");
        } else {
            unique.push(bucket);
        }
    }
    unique
}

fn report(error: &RelocateError) {
    log::error!("{error}");
    log::logger().flush();
    eprintln!("{}", last_step_line(error));
}

fn last_step_line(error: &RelocateError) -> String {
    match error.last_attempted_step() {
        Some((bucket, step)) => format!(
            "Last attempted step: {} ({}) for bucket {bucket}",
            step.number(),
            step.label()
        ),
        None => "Last attempted step: none (failed before any step ran)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use bucket_relocate_models::Step;

    use super::*;

    #[test]
    fn run_defaults_to_the_seed_stage() {
        let cli = Cli::try_parse_from(["bucket_relocate", "run", "demo"]).unwrap();
        let Commands::Run {
            stage,
            location,
            verify,
            buckets,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(stage, StageSelection::Seed);
        assert_eq!(location, None);
        assert!(!verify);
        assert_eq!(buckets, vec!["demo".to_string()]);
    }

    #[test]
    fn run_accepts_every_option() {
        let cli = Cli::try_parse_from([
            "bucket_relocate",
            "--state-dir",
            "/tmp/relocate",
            "run",
            "--stage",
            "both",
            "-l",
            "eu-west-1",
            "-c",
            "STANDARD_IA",
            "-v",
            "a",
            "b",
        ])
        .unwrap();
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/relocate")));
        let Commands::Run {
            stage,
            location,
            storage_class,
            verify,
            buckets,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(stage, StageSelection::Both);
        assert_eq!(location.as_deref(), Some("eu-west-1"));
        assert_eq!(storage_class.as_deref(), Some("STANDARD_IA"));
        assert!(verify);
        assert_eq!(buckets, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn unknown_stage_and_missing_buckets_are_rejected() {
        assert!(Cli::try_parse_from(["bucket_relocate", "run", "--stage", "all", "demo"]).is_err());
        assert!(Cli::try_parse_from(["bucket_relocate", "status"]).is_err());
    }

    #[test]
    fn repeated_buckets_are_dropped_in_order() {
        let buckets = ["b", "a", "b", "c", "a"].map(String::from).to_vec();
        assert_eq!(dedup(buckets), vec!["b", "a", "c"]);
    }

    #[test]
    fn last_line_names_the_failed_step() {
        let error = RelocateError::Step {
            bucket: "demo".into(),
            step: Step::DeleteSource,
            source: Box::new(RelocateError::SourceMissing {
                bucket: "demo".into(),
            }),
        };
        assert_eq!(
            last_step_line(&error),
            "Last attempted step: 10 (delete source bucket) for bucket demo"
        );
    }

    #[test]
    fn last_line_without_a_step() {
        let error = RelocateError::Config("bad endpoint".into());
        assert_eq!(
            last_step_line(&error),
            "Last attempted step: none (failed before any step ran)"
        );
    }
}
