//! The `stackscore` run pipeline
//!
//! Reads the direct dependencies of the given manifests, works out which of
//! them have not been scored recently, resolves them to repository
//! references and hands a shuffled queue of those references to the
//! scheduler.

pub mod pipeline;
pub mod signals;

pub use pipeline::{run, RunOptions, RunStatus};
