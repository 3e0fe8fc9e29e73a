//! Output-root checks performed before anything is written.

use std::path::Path;

use abg::AbgError;
use abg::bundler::assemble::{AssembleOptions, Assembler, assemble};
use abg::bundler::model::Bundle;
use abg::test_utils::{agent, demo_bundle};
use tempfile::TempDir;

#[cfg(unix)]
#[test]
fn symlink_to_protected_root_is_rejected_as_symlink() {
    let temp = TempDir::new().unwrap();
    let link = temp.path().join("out");
    std::os::unix::fs::symlink("/etc", &link).unwrap();

    let err = assemble(&demo_bundle(), &link).unwrap_err();
    assert!(matches!(err, AbgError::UnsafeOutputPath { .. }), "{err}");
    assert!(err.to_string().contains("symlink"), "{err}");
}

#[cfg(unix)]
#[test]
fn symlink_to_harmless_directory_is_still_rejected() {
    let temp = TempDir::new().unwrap();
    let real = temp.path().join("real");
    std::fs::create_dir_all(&real).unwrap();
    let link = temp.path().join("link");
    std::os::unix::fs::symlink(&real, &link).unwrap();

    let err = Assembler::new(&link).unwrap_err();
    assert!(err.to_string().contains("symlink"), "{err}");
    assert_eq!(std::fs::read_dir(&real).unwrap().count(), 0);
}

#[test]
fn system_roots_are_denied() {
    for root in ["/", "/etc", "/usr/local/share", "/bin", "/sbin", "/sys", "/proc", "/dev"] {
        let err = assemble(&demo_bundle(), Path::new(root)).unwrap_err();
        assert!(matches!(err, AbgError::UnsafeOutputPath { .. }), "{root}: {err}");
    }
}

#[test]
fn empty_output_root_is_a_validation_error() {
    let err = assemble(&demo_bundle(), Path::new("")).unwrap_err();
    assert!(matches!(err, AbgError::Validation(_)), "{err}");
}

#[test]
fn invalid_bundle_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let bundle = Bundle::new("x", "not-semver", "", vec![agent("alpha"), agent("alpha")]);
    let err = assemble(&bundle, temp.path()).unwrap_err();
    let AbgError::Validation(message) = err else {
        panic!("expected validation error");
    };
    assert!(message.contains("name"), "{message}");
    assert!(message.contains("version"), "{message}");
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[test]
fn assembled_tree_has_fixed_layout() {
    let temp = TempDir::new().unwrap();
    let tree = Assembler::new(temp.path())
        .unwrap()
        .with_options(AssembleOptions { prebuild: true })
        .assemble(&demo_bundle())
        .unwrap();

    for rel in [
        "agents/echo_agent.md",
        "tests/echo_agent.tests.md",
        "docs/echo_agent.md",
        "config/bundle_config.json",
        "bundle.toml",
        "README.md",
        "INSTRUCTIONS.md",
        "repackage.sh",
        "repackage.ps1",
        "manifest.json",
    ] {
        assert!(tree.root.join(rel).is_file(), "missing {rel}");
        if rel != "manifest.json" {
            assert!(tree.manifest.file_checksums.contains_key(rel), "untracked {rel}");
        }
    }
    assert!(tree.warnings.is_empty(), "{:?}", tree.warnings);
    assert!(tree.root.join("dist/demo_bundle-1.0.0.agentpkg").is_file());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(tree.root.join("repackage.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
