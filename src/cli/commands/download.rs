//! abg download - Fetch a released bundle artifact

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::bundler::package::extract_tree;
use crate::cli::commands::github_distributor;
use crate::cli::output::{HumanLayout, emit_human, emit_json};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Repository, `name` or `owner/name`
    pub repository: String,

    /// Directory to download into
    #[arg(default_value = ".")]
    pub target_dir: PathBuf,

    /// Release version, `1.2.0` or `v1.2.0` (default: latest)
    #[arg(long, value_name = "VERSION")]
    pub release: Option<String>,

    /// Also extract and verify the artifact
    #[arg(long)]
    pub extract: bool,
}

#[derive(Serialize)]
struct DownloadReport {
    repository: String,
    artifact: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    extracted_to: Option<PathBuf>,
}

pub fn run(ctx: &AppContext, args: &DownloadArgs) -> Result<ExitCode> {
    let distributor = github_distributor(ctx)?;
    let artifact =
        distributor.download_distribution(&args.repository, &args.target_dir, args.release.as_deref())?;
    let extracted_to = if args.extract {
        Some(extract_tree(&artifact, &args.target_dir, true)?.root)
    } else {
        None
    };
    let report = DownloadReport {
        repository: args.repository.clone(),
        artifact,
        extracted_to,
    };

    if ctx.robot_mode {
        emit_json(&report)?;
        return Ok(ExitCode::SUCCESS);
    }
    let mut layout = HumanLayout::new();
    layout
        .title(&format!("Downloaded {}", report.repository))
        .kv("Artifact", &report.artifact.display().to_string());
    if let Some(root) = &report.extracted_to {
        layout.kv("Extracted", &root.display().to_string());
    }
    emit_human(layout);
    Ok(ExitCode::SUCCESS)
}
