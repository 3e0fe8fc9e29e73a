//! abg extract - Unpack an artifact

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::bundler::package::extract_tree;
use crate::cli::output::{HumanLayout, emit_human, emit_json};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Artifact (.tar.gz, .zip, .agentpkg or directory)
    pub package: PathBuf,

    /// Directory to unpack into
    pub target: PathBuf,

    /// Skip checksum verification
    #[arg(long)]
    pub no_validate: bool,
}

#[derive(Serialize)]
struct ExtractReport {
    root: PathBuf,
    name: String,
    version: String,
    agents: Vec<String>,
    files: usize,
    validated: bool,
}

pub fn run(ctx: &AppContext, args: &ExtractArgs) -> Result<ExitCode> {
    let extracted = extract_tree(&args.package, &args.target, !args.no_validate)?;
    let report = ExtractReport {
        root: extracted.root.clone(),
        name: extracted.bundle.name.clone(),
        version: extracted.bundle.version.clone(),
        agents: extracted.bundle.agents.iter().map(|a| a.name.clone()).collect(),
        files: extracted.manifest.file_checksums.len(),
        validated: !args.no_validate,
    };

    if ctx.robot_mode {
        emit_json(&report)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut layout = HumanLayout::new();
    layout
        .title(&format!("Extracted {} v{}", report.name, report.version))
        .kv("Path", &report.root.display().to_string())
        .kv("Files", &report.files.to_string())
        .kv("Checksums", if report.validated { "verified" } else { "not checked" });
    layout.section("Agents");
    for agent in &report.agents {
        layout.bullet(agent);
    }
    emit_human(layout);
    Ok(ExitCode::SUCCESS)
}
