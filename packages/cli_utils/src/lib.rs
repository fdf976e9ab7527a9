#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing for the bucket relocation CLI.
//!
//! [`init_logger`] installs `pretty_env_logger` behind
//! `indicatif-log-bridge` so log lines and progress bars never fight for
//! the terminal, and tees every debug-level record from this workspace
//! into the persistent debug log. [`CopyProgress`] renders bulk copy
//! progress as `indicatif` bars.

use std::fs::File;
use std::io::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bucket_relocate_gateway::progress::ProgressCallback;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use log::{LevelFilter, Log, Metadata, Record};

pub use indicatif::MultiProgress;

/// Log targets written to the debug log. Third-party crates (the AWS SDK in
/// particular) are far too chatty at debug level.
const DEBUG_LOG_TARGET_PREFIX: &str = "bucket_relocate";

/// Renders bulk copy progress.
///
/// Each copy gets its own bar: it starts as a spinner, becomes a bar once
/// the number of objects is known, and stays on screen with a summary when
/// the copy finishes.
pub struct CopyProgress {
    multi: MultiProgress,
    current: Mutex<Option<ProgressBar>>,
    bar_style: ProgressStyle,
}

impl CopyProgress {
    /// Creates the progress renderer on `multi`.
    #[must_use]
    pub fn new(multi: &MultiProgress) -> Arc<dyn ProgressCallback> {
        let bar_style = ProgressStyle::with_template(
            "  {msg} {wide_bar:.cyan/dim} {pos}/{len} {percent}% [{eta}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Arc::new(Self {
            multi: multi.clone(),
            current: Mutex::new(None),
            bar_style,
        })
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let bar = current.get_or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new_spinner());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        });
        f(bar);
    }
}

impl ProgressCallback for CopyProgress {
    fn set_total(&self, total: u64) {
        self.with_bar(|bar| {
            bar.set_length(total);
            bar.set_position(0);
            bar.set_style(self.bar_style.clone());
        });
    }

    fn inc(&self, delta: u64) {
        self.with_bar(|bar| bar.inc(delta));
    }

    fn set_message(&self, msg: String) {
        self.with_bar(|bar| bar.set_message(msg));
    }

    fn finish(&self, msg: String) {
        let finished = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(bar) = finished {
            bar.finish_with_message(msg);
        }
    }
}

/// Console logger plus an optional append-only debug log file.
struct TeeLogger<L> {
    console: L,
    console_level: LevelFilter,
    file: Option<Mutex<File>>,
}

impl<L: Log> TeeLogger<L> {
    fn wants_file(&self, metadata: &Metadata<'_>) -> bool {
        self.file.is_some()
            && metadata.level() <= LevelFilter::Debug
            && metadata.target().starts_with(DEBUG_LOG_TARGET_PREFIX)
    }
}

impl<L: Log> Log for TeeLogger<L> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.console.enabled(metadata) || self.wants_file(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.console.enabled(record.metadata()) {
            self.console.log(record);
        }
        if self.wants_file(record.metadata())
            && let Some(file) = &self.file
        {
            let line = format_file_line(record, Utc::now());
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            file.write_all(line.as_bytes()).ok();
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Some(file) = &self.file {
            file.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .flush()
                .ok();
        }
    }
}

/// One debug log line: UTC timestamp, level, target, message.
fn format_file_line(record: &Record<'_>, at: DateTime<Utc>) -> String {
    format!(
        "{} {:<5} {} {}\n",
        at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        record.level(),
        record.target(),
        record.args()
    )
}

/// Initializes the global logger.
///
/// Console output goes through `pretty_env_logger` (filter from
/// `RUST_LOG`, default `info`) wrapped in `indicatif-log-bridge`. When
/// `debug_log` is given, every debug-level record from this workspace is
/// also appended to that file.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger(debug_log: Option<&Path>) -> MultiProgress {
    let multi = MultiProgress::new();

    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let console = builder.build();
    let console_level = console.filter();

    let mut open_error = None;
    let file = match debug_log {
        Some(path) => match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                open_error = Some(format!("{}: {e}", path.display()));
                None
            }
        },
        None => None,
    };
    let level = if file.is_some() {
        console_level.max(LevelFilter::Debug)
    } else {
        console_level
    };

    let logger = TeeLogger {
        console,
        console_level,
        file: file.map(Mutex::new),
    };

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // a logger may already be installed

    log::set_max_level(level);

    if let Some(error) = open_error {
        log::warn!("Debug log disabled, cannot open {error}");
    }
    log::debug!("Console log level {console_level}");

    multi
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use indicatif::ProgressDrawTarget;
    use log::Level;

    struct Silent;

    impl Log for Silent {
        fn enabled(&self, metadata: &Metadata<'_>) -> bool {
            metadata.level() <= Level::Info
        }
        fn log(&self, _record: &Record<'_>) {}
        fn flush(&self) {}
    }

    #[test]
    fn file_line_has_timestamp_level_and_target() {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        let line = format_file_line(
            &Record::builder()
                .args(format_args!("Step 4/15: create temporary bucket [demo]"))
                .level(Level::Info)
                .target("bucket_relocate::relocator")
                .build(),
            at,
        );
        assert_eq!(
            line,
            "2026-10-16T09:00:00.000Z INFO  bucket_relocate::relocator Step 4/15: create temporary bucket [demo]\n"
        );
    }

    #[test]
    fn debug_file_only_takes_workspace_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        let logger = TeeLogger {
            console: Silent,
            console_level: LevelFilter::Info,
            file: Some(Mutex::new(File::create(&path).unwrap())),
        };

        for (target, level) in [
            ("bucket_relocate_state::ledger", Level::Debug),
            ("aws_smithy_runtime::client", Level::Debug),
            ("bucket_relocate::relocator", Level::Trace),
            ("bucket_relocate::relocator", Level::Warn),
        ] {
            logger.log(
                &Record::builder()
                    .args(format_args!("message"))
                    .level(level)
                    .target(target)
                    .build(),
            );
        }
        logger.flush();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("DEBUG bucket_relocate_state::ledger"));
        assert!(lines[1].contains("WARN  bucket_relocate::relocator"));
    }

    #[test]
    fn each_copy_gets_a_fresh_bar() {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let progress = CopyProgress {
            multi,
            current: Mutex::new(None),
            bar_style: ProgressStyle::default_bar(),
        };

        progress.set_message("demo -> demo-relocate".to_string());
        progress.set_total(3);
        progress.inc(3);
        let first = progress.current.lock().unwrap().clone().unwrap();
        assert_eq!(first.position(), 3);

        progress.finish("done".to_string());
        assert!(first.is_finished());
        assert!(progress.current.lock().unwrap().is_none());

        progress.set_total(5);
        let second = progress.current.lock().unwrap().clone().unwrap();
        assert_eq!(second.position(), 0);
        assert_eq!(second.length(), Some(5));
    }
}
