//! abg package - Serialize a bundle into an artifact

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;

use crate::app::AppContext;
use crate::bundler::package::{PackageFormat, PackagedBundle, Packager};
use crate::cli::commands::{output_dir, parse_format, read_bundle};
use crate::cli::output::{HumanLayout, emit_human, emit_json};
use crate::error::{AbgError, Result};

#[derive(Args, Debug)]
pub struct PackageArgs {
    /// Bundle JSON file
    #[arg(required_unless_present = "from_dir", conflicts_with = "from_dir")]
    pub bundle: Option<PathBuf>,

    /// Package an already assembled (possibly edited) tree instead
    #[arg(long, value_name = "TREE")]
    pub from_dir: Option<PathBuf>,

    /// tar-gz, zip, directory or agentpkg (default: packaging.default_format)
    #[arg(long, short, value_parser = parse_format)]
    pub format: Option<PackageFormat>,

    /// Output directory (default: packaging.output_dir)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Keep the intermediate tree next to the archive
    #[arg(long)]
    pub no_cleanup: bool,

    /// Compression level 0-9
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=9))]
    pub compression_level: Option<u32>,
}

pub fn run(ctx: &AppContext, args: &PackageArgs) -> Result<ExitCode> {
    let format = args.format.unwrap_or(ctx.config.packaging.default_format);
    let mut options = ctx.config.packaging.package_options();
    if args.no_cleanup {
        options.cleanup = false;
    }
    if let Some(level) = args.compression_level {
        options.compression_level = level;
    }

    let packager = Packager::new(output_dir(ctx, args.output.as_ref()))?;
    let packaged = match (&args.from_dir, &args.bundle) {
        (Some(tree), _) => packager.package_tree(tree, format, options)?,
        (None, Some(path)) => packager.package(&read_bundle(path)?, format, options)?,
        (None, None) => {
            return Err(AbgError::Validation(
                "a bundle file or --from-dir is required".to_string(),
            ));
        }
    };

    if ctx.robot_mode {
        emit_json(&packaged)?;
    } else {
        emit_human(describe(&packaged));
    }
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn describe(packaged: &PackagedBundle) -> HumanLayout {
    let mut layout = HumanLayout::new();
    layout
        .title(&format!(
            "Packaged {} v{}",
            packaged.bundle.name, packaged.bundle.version
        ))
        .kv("Path", &packaged.path.display().to_string())
        .kv("Format", &packaged.format.to_string())
        .kv("Size", &format!("{} bytes", packaged.size_bytes))
        .kv("Checksum", packaged.checksum.as_str())
        .kv("Agents", &packaged.bundle.agents.len().to_string());
    layout
}
