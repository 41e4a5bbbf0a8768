//! Core utilities shared across all edgectl crates

pub mod error;
pub mod fs;
pub mod lock;
pub mod process;
pub mod utils;

pub use error::FileError;
pub use fs::{AtomicFile, JsonFile, StagedWrite};
pub use lock::FileLock;
pub use utils::*;

// Re-export external dependencies
pub use sysinfo::Signal;
