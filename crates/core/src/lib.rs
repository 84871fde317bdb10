//! Core domain types, errors, and constants for `stackscore`.
//!
//! ## Key Components
//!
//! - **`errors`**: the primary `Error` enum and `Result` alias shared by every
//!   crate in the workspace.
//! - **`types`**: `RefId`, the opaque scoring target identifier, and
//!   `RunResult`, the outcome of one scheduler run.
//! - **`constants`**: environment variable names, directory and file names.

pub mod constants;
pub mod errors;
pub mod types;

pub use self::{
    constants::*,
    errors::{Error, Result},
    types::*,
};
