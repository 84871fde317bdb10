//! Shared utilities for stackscore
//!
//! File system helpers used by the ledger, the instance cache and the score
//! writer, plus tracing initialisation for the binary.

pub mod atomic_file;
pub mod compression;
pub mod file_times;
pub mod tracing;

pub use atomic_file::*;
pub use compression::*;
pub use file_times::*;
