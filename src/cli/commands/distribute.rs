//! abg distribute - Publish a packaged bundle to a repository host

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;

use crate::app::AppContext;
use crate::bundler::package::inspect;
use crate::cli::commands::{exit_code, github_distributor};
use crate::cli::output::{HumanLayout, emit_human, emit_json};
use crate::distributor::{DistributeOptions, DistributionResult};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct DistributeArgs {
    /// Packaged artifact or directory tree
    pub package: PathBuf,

    /// Target repository, `name` or `owner/name` (default: agent-bundle-<name>)
    #[arg(long, short)]
    pub repository: Option<String>,

    /// Push without creating a release
    #[arg(long)]
    pub no_release: bool,

    /// Create the repository as private
    #[arg(long)]
    pub private: bool,

    #[arg(long)]
    pub draft: bool,

    #[arg(long)]
    pub prerelease: bool,

    /// Repository description used on creation
    #[arg(long)]
    pub description: Option<String>,

    /// Branch to push (default: distribution.default_branch)
    #[arg(long)]
    pub branch: Option<String>,
}

pub fn run(ctx: &AppContext, args: &DistributeArgs) -> Result<ExitCode> {
    let packaged = inspect(&args.package)?;
    let distributor = github_distributor(ctx)?;
    let options = DistributeOptions {
        public: args.private.then_some(false),
        description: args.description.clone(),
        branch: args.branch.clone(),
        draft: args.draft,
        prerelease: args.prerelease,
    };
    let result = distributor.distribute(
        &packaged,
        args.repository.as_deref(),
        !args.no_release,
        &options,
    )?;

    if ctx.robot_mode {
        emit_json(&result)?;
    } else {
        emit_human(describe(&result));
    }
    Ok(exit_code(result.success))
}

fn describe(result: &DistributionResult) -> HumanLayout {
    let mut layout = HumanLayout::new();
    let heading = if result.success {
        format!("Distributed to {}", result.repository)
    } else {
        format!("Distribution to {} failed", result.repository)
    };
    layout
        .outcome(result.success, &heading)
        .kv("Platform", &result.platform)
        .kv("Branch", &result.branch);
    if let Some(url) = &result.url {
        layout.kv("URL", url);
    }
    if let Some(sha) = &result.commit_sha {
        layout.kv("Commit", sha);
    }
    if let Some(tag) = &result.release_tag {
        layout.kv("Release", tag);
    }
    if let Some(secs) = result.retry_after_seconds {
        layout.kv("Retry after", &format!("{secs}s"));
    }
    for warning in &result.warnings {
        layout.warning(warning);
    }
    if !result.errors.is_empty() {
        layout.section("Errors");
        for err in &result.errors {
            layout.bullet(err);
        }
    }
    layout
}
