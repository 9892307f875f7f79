// src/main.rs

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use depfetch::config::{self, Config};
use depfetch::packages;
use depfetch::request::{PackageInput, Request};
use std::path::Path;
use tracing::{debug, info};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

/// Install the explicit config file, or the default one when it exists
fn init_config(explicit: Option<&Path>) -> Result<()> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Config::default_path().filter(|path| path.is_file()),
    };

    let Some(path) = path else {
        debug!("No configuration file, using defaults");
        return Ok(());
    };
    info!("Loading configuration from {}", path.display());
    config::set_config(Config::load(&path)?)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    init_config(cli.config.as_deref())?;

    match cli.command {
        Commands::FetchDeps {
            source,
            output,
            mode,
            flags,
            result_file,
            packages,
        } => {
            let inputs = PackageInput::parse_list(&packages)?;
            let request = Request::new(&source, &output, inputs)
                .with_context(|| format!("Invalid request for {}", source.display()))?
                .with_flags(flags)
                .with_mode(mode);

            info!(
                "Fetching dependencies of {} into {}",
                request.source_dir.path().display(),
                request.output_dir.path().display()
            );
            let result = packages::resolve_packages(&request).context("Request failed")?;
            let json = serde_json::to_string_pretty(&result)?;

            match result_file {
                Some(path) => {
                    std::fs::write(&path, json + "\n")
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Wrote the result to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
    }

    Ok(())
}
