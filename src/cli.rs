use std::path::PathBuf;

use clap::Parser;

use crate::config::{DEFAULTS, Overrides};

#[derive(Parser, Debug)]
#[command(
    name = "z3",
    version = env!("CARGO_PKG_VERSION"),
    about = "Stream standard input to an S3 object using a multipart upload",
    long_about = "Reads standard input until end of stream and stores it as a single S3 object. \
                  Credentials, bucket and endpoint come from the [main] section of the config file; \
                  the remaining settings can be overridden on the command line.",
    after_help = "Examples:\n  \
                  zfs send tank/data@snap | z3 tank/data@snap\n  \
                  tar c ./dir | z3 --progress --estimated 2000000000 archive.tar\n  \
                  cat big.img | z3 -s 64M --concurrency 8 images/big.img\n\n\
                  Configuration (z3.conf):\n  \
                  [main]\n  \
                  S3_KEY_ID=...\n  \
                  S3_SECRET=...\n  \
                  BUCKET=my-bucket"
)]
pub struct Cli {
    /// Destination object key
    #[arg(value_name = "KEY")]
    pub keys: Vec<String>,

    /// Multipart chunk size, eg: 10M, 1G (bare numbers are megabytes) [default: 256MB]
    #[arg(long, short = 's', value_name = "SIZE")]
    pub chunk_size: Option<String>,

    /// Estimated upload size in bytes; lets the uploader choose the part size
    #[arg(long, default_value_t = 0)]
    pub estimated: u64,

    /// Number of parts to upload in parallel, at least 1
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub concurrency: Option<usize>,

    /// The S3 storage class
    #[arg(long)]
    pub storage_class: Option<String>,

    /// Show progress report
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub progress: Option<bool>,

    /// Don't emit any output at all
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub quiet: Option<bool>,

    /// Path to the config file
    #[arg(long, default_value = DEFAULTS.config_file)]
    pub config: PathBuf,
}

impl Cli {
    /// Command line values in the form the config resolver layers on top of
    /// the config file.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            chunk_size: self.chunk_size.clone(),
            estimated: self.estimated,
            concurrency: self.concurrency,
            storage_class: self.storage_class.clone(),
            progress: self.progress,
            quiet: self.quiet,
            positional: self.keys.clone(),
        }
    }
}
