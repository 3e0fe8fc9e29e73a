//! Shared test utilities for abg.

pub mod fixtures;
pub mod memory_host;

pub use fixtures::{agent, bundle_with_agents, demo_bundle};
pub use memory_host::MemoryHost;
