use std::fs;
use std::path::{Path, PathBuf};

use abg::test_utils::demo_bundle;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::{TempDir, tempdir};

/// `abg` isolated from the user's config files and environment.
fn abg(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("abg").unwrap();
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join(".config"))
        .env_remove("ABG_CONFIG")
        .env_remove("ABG_DEFAULT_BRANCH")
        .env_remove("ABG_OUTPUT_DIR")
        .env_remove("RUST_LOG");
    cmd
}

fn bundle_file(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("bundle.json");
    fs::write(&path, serde_json::to_string_pretty(&demo_bundle()).unwrap()).unwrap();
    path
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_cli_help() {
    let dir = tempdir().unwrap();
    abg(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_cli_version() {
    let dir = tempdir().unwrap();
    abg(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_package_json_reports_checksum() {
    let dir = tempdir().unwrap();
    let bundle = bundle_file(&dir);
    let json = json_stdout(abg(dir.path()).args([
        "--json",
        "package",
        bundle.to_str().unwrap(),
        "--format",
        "zip",
        "--output",
        "dist",
    ]));
    assert_eq!(json["format"], "zip");
    assert!(json["checksum"].as_str().unwrap().starts_with("sha256:"));
    let path = PathBuf::from(json["path"].as_str().unwrap());
    assert!(path.is_file());
    assert!(path.to_string_lossy().ends_with("demo_bundle-1.0.0.zip"));
}

#[test]
fn test_package_human_output() {
    let dir = tempdir().unwrap();
    let bundle = bundle_file(&dir);
    abg(dir.path())
        .args(["package", bundle.to_str().unwrap(), "-f", "directory"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Packaged demo_bundle v1.0.0"))
        .stdout(predicate::str::contains("sha256:"));
    assert!(dir.path().join("packages/demo_bundle-1.0.0/agents/echo_agent.md").is_file());
}

#[test]
fn test_unknown_format_is_rejected_by_parser() {
    let dir = tempdir().unwrap();
    let bundle = bundle_file(&dir);
    abg(dir.path())
        .args(["package", bundle.to_str().unwrap(), "--format", "rar"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown format 'rar'"));
}

#[test]
fn test_missing_bundle_json_error_envelope() {
    let dir = tempdir().unwrap();
    let output = abg(dir.path())
        .args(["--json", "package", "nope.json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["error"], Value::Bool(true));
    assert_eq!(json["code"], "NOT_FOUND");
    assert!(!json["suggestion"].as_str().unwrap().is_empty());
}

#[test]
fn test_extract_then_verify_detects_edits() {
    let dir = tempdir().unwrap();
    let bundle = bundle_file(&dir);
    let packaged = json_stdout(abg(dir.path()).args([
        "--json",
        "package",
        bundle.to_str().unwrap(),
        "-f",
        "tar-gz",
    ]));
    let artifact = packaged["path"].as_str().unwrap().to_string();

    let extracted = json_stdout(abg(dir.path()).args([
        "--json",
        "extract",
        &artifact,
        dir.path().join("unpacked").to_str().unwrap(),
    ]));
    assert_eq!(extracted["name"], "demo_bundle");
    assert_eq!(extracted["validated"], Value::Bool(true));
    let root = PathBuf::from(extracted["root"].as_str().unwrap());

    abg(dir.path())
        .args(["verify", root.to_str().unwrap(), "--strict"])
        .assert()
        .success();

    fs::write(root.join("agents/echo_agent.md"), "customized").unwrap();
    let report = json_stdout(abg(dir.path()).args(["--json", "verify", root.to_str().unwrap()]));
    assert_eq!(report["summary"]["modified"], 1);

    abg(dir.path())
        .args(["verify", root.to_str().unwrap(), "--strict"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("agents/echo_agent.md"));
}

#[test]
fn test_update_apply_from_directory() {
    let dir = tempdir().unwrap();
    let mut newer = demo_bundle();
    newer.version = "1.1.0".to_string();
    let newer_path = dir.path().join("newer.json");
    fs::write(&newer_path, serde_json::to_string(&newer).unwrap()).unwrap();
    let bundle = bundle_file(&dir);

    abg(dir.path())
        .args(["assemble", bundle.to_str().unwrap(), "-o", "installed", "--no-prebuild"])
        .assert()
        .success();
    abg(dir.path())
        .args(["assemble", newer_path.to_str().unwrap(), "-o", "upstream", "--no-prebuild"])
        .assert()
        .success();

    let local = dir.path().join("installed/demo_bundle-1.0.0");
    let upstream = dir.path().join("upstream/demo_bundle-1.1.0");
    let check = json_stdout(abg(dir.path()).args([
        "--json",
        "update",
        "check",
        local.to_str().unwrap(),
        "--upstream-dir",
        upstream.to_str().unwrap(),
    ]));
    assert_eq!(check["available"], Value::Bool(true));

    let result = json_stdout(abg(dir.path()).args([
        "--json",
        "update",
        "apply",
        local.to_str().unwrap(),
        "--upstream-dir",
        upstream.to_str().unwrap(),
        "--no-backup",
    ]));
    assert_eq!(result["success"], Value::Bool(true));
    assert_eq!(result["to_version"], "1.1.0");
    assert!(result.get("backup_path").is_none());
}

#[test]
fn test_config_env_override() {
    let dir = tempdir().unwrap();
    let json = json_stdout(
        abg(dir.path())
            .env("ABG_DEFAULT_BRANCH", "trunk")
            .args(["--json", "config"]),
    );
    assert_eq!(json["distribution"]["default_branch"], "trunk");
    assert_eq!(json["packaging"]["default_format"], "tar-gz");
}

#[test]
fn test_project_config_file_is_layered() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join(".abg")).unwrap();
    fs::write(
        dir.path().join(".abg/config.toml"),
        "[packaging]\ndefault_format = \"zip\"\n",
    )
    .unwrap();
    let json = json_stdout(abg(dir.path()).args(["--json", "config"]));
    assert_eq!(json["packaging"]["default_format"], "zip");
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = tempdir().unwrap();
    abg(dir.path())
        .args(["--config", "absent.toml", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.toml"));
}
