use std::path::{Path, PathBuf};

use config::{File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use crate::size::{SizeError, chunk_size_or_default};

/// Built-in settings used when neither the config file nor the command line
/// say otherwise.
#[derive(Debug, Clone, Copy)]
pub struct Defaults {
    pub host: &'static str,
    pub region: &'static str,
    pub concurrency: usize,
    pub storage_class: &'static str,
    pub max_retries: u32,
    pub chunk_size_mb: u64,
    pub minimum_chunk_size_mb: u64,
    pub quiet: bool,
    pub progress: bool,
    pub config_file: &'static str,
}

pub const DEFAULTS: Defaults = Defaults {
    host: "s3.amazonaws.com",
    region: "ap-southeast-2",
    concurrency: 64,
    storage_class: "STANDARD_IA",
    max_retries: 3,
    chunk_size_mb: 256,
    minimum_chunk_size_mb: 5,
    quiet: true,
    progress: false,
    config_file: "z3.conf",
};

impl Defaults {
    pub fn chunk_size(&self) -> String {
        format!("{}MB", self.chunk_size_mb)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to load config file {path}")]
    Load {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("can't map config section [main]: {0}")]
    Mapping(#[source] config::ConfigError),

    #[error("S3 key to use not provided")]
    MissingKey,

    #[error("unknown options: {0:?}")]
    UnexpectedArguments(Vec<String>),

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
}

/// The `[main]` section of the config file. Keys are matched in either the
/// upper-case spelling used by existing config files or lower case.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FileSection {
    #[serde(alias = "S3_KEY_ID")]
    pub s3_key_id: Option<String>,
    #[serde(alias = "S3_SECRET")]
    pub s3_secret: Option<String>,
    #[serde(alias = "BUCKET")]
    pub bucket: Option<String>,
    #[serde(alias = "HOST")]
    pub host: Option<String>,
    #[serde(alias = "CONCURRENCY")]
    pub concurrency: Option<usize>,
    #[serde(alias = "CHUNK_SIZE")]
    pub chunk_size: Option<String>,
    #[serde(alias = "MAX_RETRIES")]
    pub max_retries: Option<u32>,
    #[serde(alias = "S3_STORAGE_CLASS")]
    pub s3_storage_class: Option<String>,
    #[serde(alias = "SNAPSHOT_PREFIX")]
    pub snapshot_prefix: Option<String>,
    #[serde(alias = "FILESYSTEM")]
    pub filesystem: Option<String>,
    #[serde(alias = "QUIET")]
    pub quiet: Option<bool>,
    #[serde(alias = "PROGRESS")]
    pub progress: Option<bool>,
}

/// Values taken from the command line. `None` leaves the lower layers alone.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub chunk_size: Option<String>,
    pub estimated: u64,
    pub concurrency: Option<usize>,
    pub storage_class: Option<String>,
    pub progress: Option<bool>,
    pub quiet: Option<bool>,
    pub positional: Vec<String>,
}

/// Fully resolved settings for one run. Built once by [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub key: String,
    pub host: String,
    pub region: String,
    pub concurrency: usize,
    /// Part size in bytes, `0` lets the uploader pick one.
    pub part_size: u64,
    /// Why the chunk size setting was ignored in favour of the default
    pub chunk_size_fallback: Option<SizeError>,
    pub max_retries: u32,
    pub storage_class: String,
    pub snapshot_prefix: String,
    pub filesystem: String,
    pub quiet: bool,
    pub progress: bool,
    pub estimated: u64,
}

/// Read the `[main]` section of an INI config file.
///
/// A missing `[main]` section is treated as empty.
pub fn load_file_section(path: &Path) -> Result<FileSection, ConfigError> {
    let settings = config::Config::builder()
        .add_source(File::from(path).format(FileFormat::Ini))
        .build()
        .map_err(|source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        })?;

    match settings.get::<FileSection>("main") {
        Ok(section) => Ok(section),
        Err(config::ConfigError::NotFound(_)) => Ok(FileSection::default()),
        Err(e) => Err(ConfigError::Mapping(e)),
    }
}

/// Merge defaults, the config file and the command line, in that order of
/// increasing precedence.
pub fn resolve(
    defaults: &Defaults,
    file: FileSection,
    overrides: Overrides,
) -> Result<EffectiveConfig, ConfigError> {
    if overrides.positional.len() > 1 {
        return Err(ConfigError::UnexpectedArguments(overrides.positional));
    }
    let key = match overrides.positional.first() {
        Some(key) if !key.is_empty() => key.clone(),
        _ => return Err(ConfigError::MissingKey),
    };

    let progress = overrides
        .progress
        .or(file.progress)
        .unwrap_or(defaults.progress);
    let quiet = overrides.quiet.or(file.quiet).unwrap_or(defaults.quiet) && !progress;

    let (part_size, chunk_size_fallback) = if overrides.estimated > 0 {
        (0, None)
    } else {
        let chunk_size = overrides
            .chunk_size
            .or(file.chunk_size)
            .unwrap_or_else(|| defaults.chunk_size());
        chunk_size_or_default(&chunk_size, defaults)
    };

    let concurrency = overrides
        .concurrency
        .or(file.concurrency)
        .unwrap_or(defaults.concurrency);
    if concurrency == 0 {
        return Err(ConfigError::ZeroConcurrency);
    }

    Ok(EffectiveConfig {
        access_key_id: file.s3_key_id.unwrap_or_default(),
        secret_access_key: file.s3_secret.unwrap_or_default(),
        bucket: file.bucket.unwrap_or_default(),
        key,
        host: file.host.unwrap_or_else(|| defaults.host.to_string()),
        region: defaults.region.to_string(),
        concurrency,
        part_size,
        chunk_size_fallback,
        max_retries: file.max_retries.unwrap_or(defaults.max_retries),
        storage_class: overrides
            .storage_class
            .or(file.s3_storage_class)
            .unwrap_or_else(|| defaults.storage_class.to_string()),
        snapshot_prefix: file.snapshot_prefix.unwrap_or_default(),
        filesystem: file.filesystem.unwrap_or_default(),
        quiet,
        progress,
        estimated: overrides.estimated,
    })
}

impl std::fmt::Display for EffectiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "s3://{}/{} host={} concurrency={} part_size={} storage_class={} max_retries={} filesystem={} snapshot_prefix={}",
            self.bucket,
            self.key,
            self.host,
            self.concurrency,
            self.part_size,
            self.storage_class,
            self.max_retries,
            self.filesystem,
            self.snapshot_prefix,
        )
    }
}
