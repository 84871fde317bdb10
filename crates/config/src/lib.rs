//! Runtime configuration for stackscore
//!
//! Settings come from environment variables with documented defaults; the
//! on-disk directory layout is derived from a single run root.

pub mod layout;
pub mod settings;

pub use layout::*;
pub use settings::*;
