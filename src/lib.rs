pub mod app;
pub mod bundler;
pub mod cli;
pub mod config;
pub mod distributor;
pub mod error;
pub mod test_utils;
pub mod updater;
pub mod utils;

pub use error::{AbgError, Result};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
