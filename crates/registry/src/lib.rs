//! Collaborators that feed the scheduler
//!
//! [`manifest`] reads the direct dependencies of one or more `package.json`
//! files; [`resolver`] turns package names into canonical repository
//! references by scanning published package metadata.

pub mod manifest;
pub mod resolver;

pub use manifest::read_direct_deps;
pub use resolver::{normalize, scan_for_refs, JsDelivrResolver, ReferenceResolver};
