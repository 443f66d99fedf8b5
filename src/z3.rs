mod cli;
mod config;
mod s3;
mod size;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::cli::Cli;
use crate::config::{
    ConfigError, DEFAULTS, EffectiveConfig, FileSection, Overrides, load_file_section, resolve,
};
use crate::s3::{S3Client, Uploader, UploaderOptions, upload_stream};

const USAGE_EXIT_CODE: i32 = 1;

/// What `main` does after the settings are merged.
#[derive(Debug)]
enum Startup {
    Run(EffectiveConfig),
    /// Print the error with the help text and exit without uploading.
    Usage(ConfigError),
}

fn startup(file: FileSection, overrides: Overrides) -> Result<Startup, ConfigError> {
    match resolve(&DEFAULTS, file, overrides) {
        Ok(config) => Ok(Startup::Run(config)),
        Err(e @ (ConfigError::MissingKey | ConfigError::UnexpectedArguments(_))) => {
            Ok(Startup::Usage(e))
        }
        Err(e) => Err(e),
    }
}

fn usage_message(e: &ConfigError) -> String {
    format!("{}\n{}", style(e).red(), Cli::command().render_help())
}

fn init_tracing(quiet: bool) {
    let default_level = if quiet { "error" } else { "info" };
    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| default_level.to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_bar(config: &EffectiveConfig) -> Result<ProgressBar> {
    let pb = if config.estimated > 0 {
        let pb = ProgressBar::new(config.estimated);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {msg}",
                )
                .context("invalid progress template")?
                .progress_chars("#>-"),
        );
        pb
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {bytes} {bytes_per_sec} {msg}")
                .context("invalid progress template")?,
        );
        pb
    };
    pb.set_message(config.key.clone());
    Ok(pb)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file = load_file_section(&cli.config)?;
    let config = match startup(file, cli.overrides())? {
        Startup::Run(config) => config,
        Startup::Usage(e) => {
            eprintln!("{}", usage_message(&e));
            std::process::exit(USAGE_EXIT_CODE);
        }
    };

    init_tracing(config.quiet);
    if let Some(e) = &config.chunk_size_fallback {
        debug!("Falling back to default chunk size: {}", e);
    }
    debug!("Resolved config: {}", config);
    info!("z3 v{}", env!("CARGO_PKG_VERSION"));

    let client = S3Client::new(&config).await.into_inner();
    let mut uploader = Uploader::new(
        client,
        UploaderOptions {
            part_size: config.part_size,
            concurrency: config.concurrency,
            estimated_size: config.estimated,
            storage_class: Some(config.storage_class.clone()),
        },
    );

    let pb = if config.progress {
        let pb = progress_bar(&config)?;
        uploader = uploader.with_progress(pb.clone());
        Some(pb)
    } else {
        None
    };

    let mut stdin = tokio::io::stdin();
    let result = upload_stream(&uploader, &config, &mut stdin).await;

    if let Some(pb) = pb {
        match &result {
            Ok(_) => pb.finish_with_message(format!("✓ {}", config.key)),
            Err(_) => pb.abandon_with_message(format!("✗ {}", config.key)),
        }
    }

    result.context("Failed to Upload")?;
    Ok(())
}
