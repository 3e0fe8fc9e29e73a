//! abg update - Track and merge upstream versions of an installed bundle

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Subcommand};
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::commands::{exit_code, github_distributor};
use crate::cli::output::{HumanLayout, emit_human, emit_json};
use crate::error::{AbgError, Result};
use crate::updater::{
    DirectoryUpstream, ReleaseUpstream, UpdateResult, UpdateTracker, UpstreamSource, restore_backup,
};

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(subcommand)]
    pub command: UpdateCommand,
}

#[derive(Subcommand, Debug)]
pub enum UpdateCommand {
    /// Report whether upstream has a newer version
    Check {
        bundle: PathBuf,
        #[command(flatten)]
        upstream: UpstreamArgs,
    },

    /// List tracked files edited since install
    Status { bundle: PathBuf },

    /// Merge the newest upstream version into the bundle
    Apply {
        bundle: PathBuf,
        #[command(flatten)]
        upstream: UpstreamArgs,

        /// Skip the backup copy
        #[arg(long)]
        no_backup: bool,

        /// Replace locally edited files with upstream versions
        #[arg(long)]
        overwrite_edits: bool,
    },

    /// Put a backup made by `apply` back in place
    Restore { backup: PathBuf, bundle: PathBuf },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct UpstreamArgs {
    /// Newer assembled tree on disk
    #[arg(long, value_name = "DIR")]
    pub upstream_dir: Option<PathBuf>,

    /// Repository whose latest release is the upstream
    #[arg(long, value_name = "REPO")]
    pub repository: Option<String>,
}

pub fn run(ctx: &AppContext, args: &UpdateArgs) -> Result<ExitCode> {
    match &args.command {
        UpdateCommand::Check { bundle, upstream } => with_upstream(ctx, upstream, |source| {
            let info = UpdateTracker::new(source).check_for_updates(bundle)?;
            if ctx.robot_mode {
                emit_json(&info)?;
                return Ok(ExitCode::SUCCESS);
            }
            let mut layout = HumanLayout::new();
            let title = if info.available {
                format!("Update available: {} -> {}", info.current_version, info.latest_version)
            } else {
                format!("Up to date at {}", info.current_version)
            };
            layout.title(&title).kv("Upstream", &info.upstream);
            if !info.changes.is_empty() {
                layout.section("Changes");
                for change in &info.changes {
                    layout.bullet(change);
                }
            }
            emit_human(layout);
            Ok(ExitCode::SUCCESS)
        }),
        UpdateCommand::Status { bundle } => {
            let tracker = UpdateTracker::new(DirectoryUpstream::new(bundle));
            let customized = tracker.detect_customizations(bundle)?;
            if ctx.robot_mode {
                emit_json(&customized)?;
                return Ok(ExitCode::SUCCESS);
            }
            let edited: Vec<_> = customized
                .iter()
                .filter(|(_, edited)| **edited)
                .map(|(path, _)| path)
                .collect();
            let mut layout = HumanLayout::new();
            layout
                .title(&bundle.display().to_string())
                .kv("Tracked", &customized.len().to_string())
                .kv("Customized", &edited.len().to_string());
            for path in edited {
                layout.bullet(path);
            }
            emit_human(layout);
            Ok(ExitCode::SUCCESS)
        }
        UpdateCommand::Apply {
            bundle,
            upstream,
            no_backup,
            overwrite_edits,
        } => {
            let preserve = ctx.config.update.preserve_edits && !overwrite_edits;
            let backup = ctx.config.update.backup && !no_backup;
            with_upstream(ctx, upstream, |source| {
                let result = UpdateTracker::new(source).update_bundle(bundle, preserve, backup)?;
                if ctx.robot_mode {
                    emit_json(&result)?;
                } else {
                    emit_human(describe(&result));
                }
                Ok(exit_code(result.success))
            })
        }
        UpdateCommand::Restore { backup, bundle } => {
            restore_backup(backup, bundle)?;
            #[derive(Serialize)]
            struct Restored<'a> {
                restored: &'a PathBuf,
                from: &'a PathBuf,
            }
            if ctx.robot_mode {
                emit_json(&Restored {
                    restored: bundle,
                    from: backup,
                })?;
            } else {
                let mut layout = HumanLayout::new();
                layout
                    .title("Restored bundle")
                    .kv("Bundle", &bundle.display().to_string())
                    .kv("Backup", &backup.display().to_string());
                emit_human(layout);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run `f` against the upstream named on the command line.
fn with_upstream<T>(
    ctx: &AppContext,
    args: &UpstreamArgs,
    f: impl FnOnce(&dyn UpstreamSource) -> Result<T>,
) -> Result<T> {
    if let Some(dir) = &args.upstream_dir {
        return f(&DirectoryUpstream::new(dir));
    }
    let repository = args
        .repository
        .as_deref()
        .ok_or_else(|| AbgError::Validation("--upstream-dir or --repository is required".to_string()))?;
    let distributor = github_distributor(ctx)?;
    f(&ReleaseUpstream::new(&distributor, repository))
}

fn describe(result: &UpdateResult) -> HumanLayout {
    let mut layout = HumanLayout::new();
    let title = if !result.success {
        format!("Update to {} failed", result.to_version)
    } else if result.from_version == result.to_version {
        format!("Already at {}", result.to_version)
    } else {
        format!("Updated {} -> {}", result.from_version, result.to_version)
    };
    layout.outcome(result.success && !result.has_conflicts(), &title);
    if let Some(path) = &result.backup_path {
        layout.kv("Backup", &path.display().to_string());
    }
    let groups = [
        ("Updated", &result.updated_files),
        ("Preserved", &result.preserved_files),
        ("Removed", &result.removed_files),
        ("Conflicts", &result.conflicts),
    ];
    for (label, files) in groups {
        if files.is_empty() {
            continue;
        }
        layout.section(label);
        for file in files {
            layout.bullet(file);
        }
    }
    if let Some(err) = &result.error {
        layout.warning(&err.message);
    }
    layout
}
