//! abg verify - Report local modifications of an installed bundle

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;

use crate::app::AppContext;
use crate::bundler::local_safety::{ModificationStatus, detect_modifications};
use crate::bundler::manifest::Manifest;
use crate::cli::commands::exit_code;
use crate::cli::output::{HumanLayout, emit_human, emit_json};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Bundle directory containing manifest.json
    pub bundle: PathBuf,

    /// Exit non-zero when any tracked file is modified or missing
    #[arg(long)]
    pub strict: bool,
}

pub fn run(ctx: &AppContext, args: &VerifyArgs) -> Result<ExitCode> {
    let manifest = Manifest::load_from_dir(&args.bundle)?;
    let report = detect_modifications(&args.bundle, &manifest)?;
    let ok = !(args.strict && report.summary.needs_attention());

    if ctx.robot_mode {
        emit_json(&report)?;
        return Ok(exit_code(ok));
    }

    let mut layout = HumanLayout::new();
    layout
        .outcome(
            !report.summary.needs_attention(),
            &format!("{} v{}", manifest.bundle.name, manifest.bundle.version),
        )
        .kv("Clean", &report.summary.clean.to_string())
        .kv("Modified", &report.summary.modified.to_string())
        .kv("Deleted", &report.summary.deleted.to_string())
        .kv("Untracked", &report.summary.new.to_string());
    let flagged: Vec<_> = report
        .files
        .iter()
        .filter(|file| file.status != ModificationStatus::Clean)
        .collect();
    if !flagged.is_empty() {
        layout.section("Changes");
        for file in flagged {
            let status = match file.status {
                ModificationStatus::Modified => "modified",
                ModificationStatus::Deleted => "deleted",
                ModificationStatus::New => "untracked",
                ModificationStatus::Clean => "clean",
            };
            layout.bullet(&format!("{status:<10} {}", file.path));
        }
    }
    emit_human(layout);
    Ok(exit_code(ok))
}
