//! Packaging, extraction and checksum behavior across every artifact format.

use std::fs;

use abg::AbgError;
use abg::bundler::assemble::collect_checksums;
use abg::bundler::manifest::{MANIFEST_FILE, Manifest};
use abg::bundler::package::{
    PackageFormat, PackageOptions, Packager, extract, extract_tree, inspect,
};
use abg::test_utils::{bundle_with_agents, demo_bundle};
use tempfile::TempDir;

#[test]
fn demo_bundle_as_directory() {
    let temp = TempDir::new().unwrap();
    let packaged = Packager::new(temp.path())
        .unwrap()
        .package(&demo_bundle(), PackageFormat::Directory, PackageOptions::default())
        .unwrap();

    assert_eq!(packaged.format, PackageFormat::Directory);
    assert!(packaged.path.join("agents/echo_agent.md").is_file());
    assert!(packaged.checksum.as_str().starts_with("sha256:"));

    let manifest = Manifest::load_from_dir(&packaged.path).unwrap();
    assert_eq!(manifest.agents.len(), 1);
    assert_eq!(manifest.agents[0].name, "echo_agent");
    assert!(!manifest.file_checksums.is_empty());
    assert!(manifest.file_checksums.contains_key("agents/echo_agent.md"));
}

#[test]
fn every_format_round_trips_with_matching_checksums() {
    for format in PackageFormat::ALL {
        let temp = TempDir::new().unwrap();
        let bundle = bundle_with_agents("round_trip", "0.3.1", &["alpha", "beta"]);
        let packaged = Packager::new(temp.path().join("out"))
            .unwrap()
            .package(&bundle, format, PackageOptions::default())
            .unwrap();

        let extracted = extract_tree(&packaged.path, &temp.path().join("unpacked"), true)
            .unwrap_or_else(|err| panic!("{format}: {err}"));
        assert_eq!(extracted.bundle.name, "round_trip", "{format}");
        assert_eq!(extracted.bundle.agents.len(), 2, "{format}");

        let fresh = collect_checksums(&extracted.root).unwrap();
        assert_eq!(fresh, extracted.manifest.file_checksums, "{format}");
    }
}

#[test]
fn archives_are_byte_identical_across_runs() {
    for format in [PackageFormat::TarGz, PackageFormat::Zip, PackageFormat::PlatformPackage] {
        let temp = TempDir::new().unwrap();
        let bundle = demo_bundle();
        let first = Packager::new(temp.path().join("a"))
            .unwrap()
            .package(&bundle, format, PackageOptions::default())
            .unwrap();
        let second = Packager::new(temp.path().join("b"))
            .unwrap()
            .package(&bundle, format, PackageOptions::default())
            .unwrap();
        assert_eq!(first.checksum, second.checksum, "{format}");
        assert_eq!(first.size_bytes, second.size_bytes, "{format}");
    }
}

#[test]
fn cleanup_removes_intermediate_tree() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    let packaged = Packager::new(&out)
        .unwrap()
        .package(&demo_bundle(), PackageFormat::TarGz, PackageOptions::default())
        .unwrap();
    assert!(packaged.path.is_file());
    assert!(!out.join("demo_bundle-1.0.0").exists());

    let options = PackageOptions {
        cleanup: false,
        ..PackageOptions::default()
    };
    Packager::new(&out)
        .unwrap()
        .package(&demo_bundle(), PackageFormat::Zip, options)
        .unwrap();
    assert!(out.join("demo_bundle-1.0.0/manifest.json").is_file());
}

#[test]
fn platform_package_carries_build_descriptor() {
    let temp = TempDir::new().unwrap();
    let packaged = Packager::new(temp.path())
        .unwrap()
        .package(&demo_bundle(), PackageFormat::PlatformPackage, PackageOptions::default())
        .unwrap();
    assert!(packaged.path.to_string_lossy().ends_with(".agentpkg"));

    let descriptor = packaged.descriptor.clone().unwrap();
    assert_eq!(descriptor.name, "demo_bundle");
    assert_eq!(descriptor.min_runtime_version, "1.0.0");

    let extracted = extract_tree(&packaged.path, &temp.path().join("x"), true).unwrap();
    assert_eq!(extracted.descriptor.unwrap().entry_point, descriptor.entry_point);
}

#[test]
fn tampered_archive_fails_validation_only_when_asked() {
    let temp = TempDir::new().unwrap();
    let options = PackageOptions {
        cleanup: false,
        ..PackageOptions::default()
    };
    let packager = Packager::new(temp.path().join("out")).unwrap();
    let original = packager
        .package(&demo_bundle(), PackageFormat::Directory, options)
        .unwrap();
    fs::write(original.path.join("agents/echo_agent.md"), "edited by hand").unwrap();

    let err = extract(&original.path, &temp.path().join("strict"), true).unwrap_err();
    assert!(matches!(err, AbgError::ChecksumMismatch { .. }), "{err}");

    let bundle = extract(&original.path, &temp.path().join("lenient"), false).unwrap();
    assert_eq!(bundle.name, "demo_bundle");
}

#[test]
fn extract_without_manifest_is_a_packaging_error() {
    let temp = TempDir::new().unwrap();
    let tree = temp.path().join("not_a_bundle");
    fs::create_dir_all(&tree).unwrap();
    fs::write(tree.join("notes.txt"), "hello").unwrap();

    let err = extract(&tree, &temp.path().join("out"), true).unwrap_err();
    assert!(matches!(err, AbgError::Packaging { .. }), "{err}");
}

#[test]
fn unknown_extension_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bundle.rar");
    fs::write(&path, b"rar").unwrap();
    let err = extract(&path, &temp.path().join("out"), true).unwrap_err();
    assert!(matches!(err, AbgError::UnknownFormat(_)));
}

#[test]
fn edited_tree_repackages_with_fresh_checksums() {
    let temp = TempDir::new().unwrap();
    let options = PackageOptions {
        cleanup: false,
        ..PackageOptions::default()
    };
    let packager = Packager::new(temp.path().join("out")).unwrap();
    let original = packager
        .package(&demo_bundle(), PackageFormat::Directory, options)
        .unwrap();
    fs::write(original.path.join("docs/extra.md"), "local notes").unwrap();

    let repacked = packager
        .package_tree(&original.path, PackageFormat::TarGz, options)
        .unwrap();
    let extracted = extract_tree(&repacked.path, &temp.path().join("x"), true).unwrap();
    assert!(extracted.manifest.file_checksums.contains_key("docs/extra.md"));
    assert!(extracted.root.join(MANIFEST_FILE).is_file());
}

#[test]
fn inspect_rebuilds_packaged_bundle() {
    let temp = TempDir::new().unwrap();
    let packaged = Packager::new(temp.path())
        .unwrap()
        .package(&demo_bundle(), PackageFormat::Zip, PackageOptions::default())
        .unwrap();
    let inspected = inspect(&packaged.path).unwrap();
    assert_eq!(inspected.checksum, packaged.checksum);
    assert_eq!(inspected.size_bytes, packaged.size_bytes);
    assert_eq!(inspected.format, PackageFormat::Zip);
    assert_eq!(inspected.bundle.name, "demo_bundle");
}
