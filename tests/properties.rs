//! Property-based tests for the checksum engine.

use std::fs;
use std::path::Path;

use proptest::prelude::*;

use abg::bundler::checksum::{hash_bytes, hash_file, hash_tree};
use tempfile::TempDir;

fn arb_files() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::btree_map(
        r"[a-z]{1,8}(/[a-z]{1,8}){0,2}\.md",
        prop::collection::vec(any::<u8>(), 0..256),
        1..8,
    )
    .prop_map(|files| files.into_iter().collect())
}

fn write_tree(root: &Path, files: &[(String, Vec<u8>)]) {
    for (rel, bytes) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn tree_hash_ignores_write_order(files in arb_files()) {
        let forward = TempDir::new().unwrap();
        let backward = TempDir::new().unwrap();
        let mut reversed = files.clone();
        reversed.reverse();

        write_tree(forward.path(), &files);
        write_tree(backward.path(), &reversed);

        prop_assert_eq!(hash_tree(forward.path()).unwrap(), hash_tree(backward.path()).unwrap());
    }

    #[test]
    fn checksum_is_tagged_sha256_hex(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        let digest = hash_bytes(&bytes);
        let text = digest.as_str();
        prop_assert!(text.starts_with("sha256:"));
        prop_assert_eq!(digest.hex().len(), 64);
        prop_assert!(digest.hex().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn file_hash_matches_byte_hash(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, &bytes).unwrap();
        prop_assert_eq!(hash_file(&path).unwrap(), hash_bytes(&bytes));
    }
}

#[test]
fn changing_one_byte_changes_tree_hash() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.md"), "alpha").unwrap();
    fs::write(dir.path().join("b.md"), "beta").unwrap();
    let before = hash_tree(dir.path()).unwrap();
    fs::write(dir.path().join("b.md"), "betA").unwrap();
    assert_ne!(before, hash_tree(dir.path()).unwrap());
}
