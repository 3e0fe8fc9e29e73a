//! abg releases - List distributed bundles or the releases of one

use std::process::ExitCode;

use clap::Args;

use crate::app::AppContext;
use crate::cli::commands::github_distributor;
use crate::cli::output::{HumanLayout, emit_human, emit_json};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct ReleasesArgs {
    /// Owner whose bundle repositories to list (default: authenticated user)
    pub owner: Option<String>,

    /// List the releases of this repository instead
    #[arg(long, short, conflicts_with = "owner")]
    pub repository: Option<String>,
}

pub fn run(ctx: &AppContext, args: &ReleasesArgs) -> Result<ExitCode> {
    let distributor = github_distributor(ctx)?;
    let mut layout = HumanLayout::new();

    if let Some(repository) = &args.repository {
        let releases = distributor.list_releases(repository)?;
        if ctx.robot_mode {
            emit_json(&releases)?;
            return Ok(ExitCode::SUCCESS);
        }
        layout.title(&format!("Releases of {repository}"));
        if releases.is_empty() {
            layout.bullet("(none)");
        }
        for release in &releases {
            let when = release
                .published_at
                .map(|at| at.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unpublished".to_string());
            let marker = if release.prerelease { " (prerelease)" } else { "" };
            layout.bullet(&format!("{} {when}{marker}", release.tag));
        }
    } else {
        let repos = distributor.list_distributions(args.owner.as_deref())?;
        if ctx.robot_mode {
            emit_json(&repos)?;
            return Ok(ExitCode::SUCCESS);
        }
        layout.title("Distributed bundles");
        if repos.is_empty() {
            layout.bullet("(none)");
        }
        for repo in &repos {
            if repo.description.is_empty() {
                layout.bullet(&repo.name);
            } else {
                layout.bullet(&format!("{} - {}", repo.name, repo.description));
            }
        }
    }
    emit_human(layout);
    Ok(ExitCode::SUCCESS)
}
