//! Layered run configuration.
//!
//! Built-in defaults are overlaid, in order, by an optional TOML file, by
//! `BUCKET_RELOCATE_*` environment variables, and by command-line flags
//! (applied by the caller after [`RelocateConfig::load`]).
//!
//! ```toml
//! state_dir = "/var/lib/bucketrelocate"
//! temp_suffix = "-relocate"
//!
//! [retry]
//! interval_secs = 5
//! max_retries = 24
//!
//! [copy]
//! concurrency = 16
//!
//! [validation]
//! fail_on_unreadable = true
//!
//! [s3]
//! endpoint_url = "http://localhost:9000"
//! region = "us-east-1"
//! force_path_style = true
//! ```

use std::path::{Path, PathBuf};

use bucket_relocate_gateway::s3::S3Settings;
use bucket_relocate_models::DEFAULT_TEMP_SUFFIX;
use bucket_relocate_state::paths::{StatePaths, default_state_dir};
use serde::{Deserialize, Serialize};

use crate::RelocateError;

/// Names an explicit configuration file.
pub const CONFIG_ENV: &str = "BUCKET_RELOCATE_CONFIG";
/// Overrides `state_dir`.
pub const STATE_DIR_ENV: &str = "BUCKET_RELOCATE_STATE_DIR";
/// Overrides `s3.endpoint_url`.
pub const ENDPOINT_URL_ENV: &str = "BUCKET_RELOCATE_ENDPOINT_URL";
/// Overrides `s3.region`.
pub const REGION_ENV: &str = "BUCKET_RELOCATE_REGION";

/// Everything a run needs besides the bucket list and target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelocateConfig {
    /// Directory holding the ledger, manifest, debug log and snapshots.
    pub state_dir: PathBuf,
    /// Suffix that turns a source bucket name into its temporary name.
    pub temp_suffix: String,
    /// Delete-bucket retry schedule.
    pub retry: RetrySettings,
    /// Bulk copy tuning.
    pub copy: CopySettings,
    /// Validation behavior.
    pub validation: ValidationSettings,
    /// S3 connection overrides.
    pub s3: S3Settings,
}

impl Default for RelocateConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            temp_suffix: DEFAULT_TEMP_SUFFIX.to_string(),
            retry: RetrySettings::default(),
            copy: CopySettings::default(),
            validation: ValidationSettings::default(),
            s3: S3Settings::default(),
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    /// Fixed wait between attempts.
    pub interval_secs: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            max_retries: 24,
        }
    }
}

/// `[copy]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CopySettings {
    /// Concurrent transfers for unversioned buckets.
    pub concurrency: usize,
}

impl Default for CopySettings {
    fn default() -> Self {
        Self { concurrency: 16 }
    }
}

/// `[validation]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationSettings {
    /// Abort when the read check finds unreadable objects. When `false`
    /// the findings are only logged.
    pub fail_on_unreadable: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            fail_on_unreadable: true,
        }
    }
}

impl RelocateConfig {
    /// Loads the configuration from the file and environment layers.
    ///
    /// The file is `config_path` if given, else `$BUCKET_RELOCATE_CONFIG`,
    /// else `config.toml` in the state directory (`state_dir` if given,
    /// else `$BUCKET_RELOCATE_STATE_DIR`, else the default) when it
    /// exists. An explicitly named file must exist.
    ///
    /// # Errors
    ///
    /// Returns [`RelocateError::Config`] if a file cannot be read or
    /// parsed, or the result is invalid.
    pub fn load(config_path: Option<&Path>, state_dir: Option<&Path>) -> Result<Self, RelocateError> {
        Self::load_with(config_path, state_dir, |name| {
            std::env::var(name).ok().filter(|value| !value.is_empty())
        })
    }

    fn load_with(
        config_path: Option<&Path>,
        state_dir: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RelocateError> {
        let explicit = config_path
            .map(Path::to_path_buf)
            .or_else(|| env(CONFIG_ENV).map(PathBuf::from));

        let mut config = if let Some(path) = explicit {
            Self::from_file(&path)?
        } else {
            let dir = state_dir
                .map(Path::to_path_buf)
                .or_else(|| env(STATE_DIR_ENV).map(PathBuf::from))
                .unwrap_or_else(default_state_dir);
            let candidate = StatePaths::new(dir).config_file();
            if candidate.is_file() {
                Self::from_file(&candidate)?
            } else {
                Self::default()
            }
        };

        if let Some(dir) = env(STATE_DIR_ENV) {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(url) = env(ENDPOINT_URL_ENV) {
            config.s3.endpoint_url = Some(url);
        }
        if let Some(region) = env(REGION_ENV) {
            config.s3.region = Some(region);
        }
        if let Some(dir) = state_dir {
            config.state_dir = dir.to_path_buf();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`RelocateError::Config`] if the file cannot be read or
    /// parsed.
    pub fn from_file(path: &Path) -> Result<Self, RelocateError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RelocateError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::parse(&text)
            .map_err(|e| RelocateError::Config(format!("{}: {e}", path.display())))?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses TOML configuration text.
    ///
    /// # Errors
    ///
    /// Returns the TOML error message if the text is not a valid
    /// configuration.
    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Checks values that would make a run impossible.
    ///
    /// # Errors
    ///
    /// Returns [`RelocateError::Config`] describing the first bad value.
    pub fn validate(&self) -> Result<(), RelocateError> {
        if self.temp_suffix.is_empty() {
            return Err(RelocateError::Config(
                "temp_suffix must not be empty".to_string(),
            ));
        }
        if self.copy.concurrency == 0 {
            return Err(RelocateError::Config(
                "copy.concurrency must be at least 1".to_string(),
            ));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(RelocateError::Config("state_dir must not be empty".to_string()));
        }
        Ok(())
    }
}
