//! Bundle assembly, packaging and integrity tracking.

pub mod assemble;
pub mod checksum;
pub mod local_safety;
pub mod manifest;
pub mod model;
pub mod package;
pub mod templates;

pub use assemble::{AssembleOptions, AssembledTree, Assembler, PrebuildOutcome, assemble};
pub use checksum::{Checksum, hash_bytes, hash_file, hash_tree};
pub use manifest::{BuildDescriptor, Manifest, ManifestAgent, ManifestBundle};
pub use model::{Bundle, BundleStatus, GeneratedAgent};
pub use package::{
    ExtractedBundle, PackageFormat, PackageOptions, PackagedBundle, Packager, extract,
    extract_tree, inspect, verify_tree,
};
