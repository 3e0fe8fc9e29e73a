//! CLI command implementations
//!
//! Each subcommand has its own module with:
//! - Args struct for command-line arguments
//! - `run()` function to execute the command
//!
//! Handlers return the process exit code: a command can finish without an
//! error yet still report failure, e.g. a distribution the host rejected.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::app::AppContext;
use crate::bundler::model::Bundle;
use crate::bundler::package::PackageFormat;
use crate::cli::Commands;
use crate::distributor::{Distributor, GhCliHost};
use crate::error::{AbgError, Result};

pub mod assemble;
pub mod config;
pub mod distribute;
pub mod download;
pub mod extract;
pub mod package;
pub mod releases;
pub mod update;
pub mod verify;

/// Dispatch a command to its handler
pub fn run(ctx: &AppContext, command: &Commands) -> Result<ExitCode> {
    match command {
        Commands::Assemble(args) => assemble::run(ctx, args),
        Commands::Package(args) => package::run(ctx, args),
        Commands::Extract(args) => extract::run(ctx, args),
        Commands::Verify(args) => verify::run(ctx, args),
        Commands::Distribute(args) => distribute::run(ctx, args),
        Commands::Releases(args) => releases::run(ctx, args),
        Commands::Download(args) => download::run(ctx, args),
        Commands::Update(args) => update::run(ctx, args),
        Commands::Config(args) => config::run(ctx, args),
    }
}

/// Read a bundle handed over by the generation pipeline as JSON.
pub(crate) fn read_bundle(path: &Path) -> Result<Bundle> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            AbgError::NotFound(format!("bundle file {} does not exist", path.display()))
        } else {
            AbgError::Io(err)
        }
    })?;
    Ok(serde_json::from_str(&raw)?)
}

pub(crate) fn parse_format(raw: &str) -> std::result::Result<PackageFormat, String> {
    raw.parse().map_err(|_| {
        let known = PackageFormat::ALL
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        format!("unknown format '{raw}' (expected one of: {known})")
    })
}

/// `path` or the configured output directory.
pub(crate) fn output_dir(ctx: &AppContext, path: Option<&PathBuf>) -> PathBuf {
    path.cloned()
        .unwrap_or_else(|| ctx.config.packaging.output_dir.clone())
}

/// Distributor over the `gh`/`git` host, failing early if either is missing.
pub(crate) fn github_distributor(ctx: &AppContext) -> Result<Distributor<GhCliHost>> {
    let host = GhCliHost::new(&ctx.config.distribution, ctx.config.timeouts);
    host.check_available()?;
    Ok(Distributor::new(host, ctx.config.distribution.clone()))
}

pub(crate) const fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
