// src/cli.rs
//! CLI definitions for depfetch
//!
//! This module contains the command-line interface definitions using clap.
//! `main` turns the parsed arguments into a request for the library.

use clap::{Parser, Subcommand};
use depfetch::request::{Flag, Mode};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "depfetch")]
#[command(version)]
#[command(about = "Prefetch the dependencies of a source tree for offline builds", long_about = None)]
pub struct Cli {
    /// Configuration file (default: <config dir>/depfetch/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve and download the dependencies of the given packages
    FetchDeps {
        /// Source tree, a git checkout
        #[arg(long, default_value = ".")]
        source: PathBuf,

        /// Directory that receives the prefetched artifacts
        #[arg(long, default_value = "./depfetch-output")]
        output: PathBuf,

        /// How inconsistencies are treated
        #[arg(long, default_value = "strict")]
        mode: Mode,

        /// Optional behavior switch, may be repeated (cgo-disable, ...)
        #[arg(long = "flag", value_name = "FLAG")]
        flags: Vec<Flag>,

        /// Write the JSON result here instead of stdout
        #[arg(long)]
        result_file: Option<PathBuf>,

        /// Packages to process: a package manager name (`gomod`), a JSON
        /// object (`{"type": "pip", "path": "app"}`) or a JSON list of them
        packages: String,
    },
}
