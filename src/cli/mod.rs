//! CLI module - command-line interface definitions and handlers
//!
//! Uses clap v4 with derive macros for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod commands;
pub mod output;

/// Agent bundle generator - package, distribute and update agent bundles
#[derive(Parser, Debug)]
#[command(name = "abg")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Emit machine-readable JSON on stdout (logs go to stderr)
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (default: ~/.config/abg/config.toml)
    #[arg(long, global = true, env = "ABG_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a bundle's directory tree without packaging it
    Assemble(commands::assemble::AssembleArgs),

    /// Package a bundle (or an assembled tree) into an artifact
    Package(commands::package::PackageArgs),

    /// Unpack an artifact and verify its checksums
    Extract(commands::extract::ExtractArgs),

    /// Check an installed bundle for local modifications
    Verify(commands::verify::VerifyArgs),

    /// Publish a packaged bundle to the repository host
    Distribute(commands::distribute::DistributeArgs),

    /// List published bundle repositories
    Releases(commands::releases::ReleasesArgs),

    /// Download a published bundle release
    Download(commands::download::DownloadArgs),

    /// Check for and apply upstream updates
    Update(commands::update::UpdateArgs),

    /// Show the effective configuration
    Config(commands::config::ConfigArgs),
}
