//! abg assemble - Write a bundle's directory tree

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;

use crate::app::AppContext;
use crate::bundler::assemble::{AssembleOptions, Assembler, PrebuildOutcome};
use crate::cli::commands::{output_dir, read_bundle};
use crate::cli::output::{HumanLayout, emit_human, emit_json};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct AssembleArgs {
    /// Bundle JSON file
    pub bundle: PathBuf,

    /// Output directory (default: packaging.output_dir)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Skip building the platform package into dist/
    #[arg(long)]
    pub no_prebuild: bool,
}

pub fn run(ctx: &AppContext, args: &AssembleArgs) -> Result<ExitCode> {
    let bundle = read_bundle(&args.bundle)?;
    let options = AssembleOptions {
        prebuild: ctx.config.packaging.prebuild && !args.no_prebuild,
    };
    let tree = Assembler::new(output_dir(ctx, args.output.as_ref()))?
        .with_options(options)
        .assemble(&bundle)?;

    if ctx.robot_mode {
        emit_json(&tree)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut layout = HumanLayout::new();
    layout
        .title(&format!("Assembled {}", bundle.tree_name()))
        .kv("Path", &tree.root.display().to_string())
        .kv("Files", &tree.manifest.file_checksums.len().to_string());
    match &tree.prebuild {
        PrebuildOutcome::Built { artifact } => {
            layout.kv("Platform package", &artifact.display().to_string());
        }
        PrebuildOutcome::Skipped => {
            layout.kv("Platform package", "skipped");
        }
        PrebuildOutcome::Failed { .. } => {}
    }
    for warning in &tree.warnings {
        layout.warning(warning);
    }
    emit_human(layout);
    Ok(ExitCode::SUCCESS)
}
