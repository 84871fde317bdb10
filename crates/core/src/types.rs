//! Domain types shared between the ledger, cache and scheduler crates

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::ops::Deref;

/// Canonical identifier of an external scoring target, e.g. `owner/repo`.
///
/// Normalisation happens in the resolver; everything downstream treats the
/// value as an opaque, comparable key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefId(String);

impl RefId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex encoding of the UTF-8 bytes, used for file and directory names.
    pub fn hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }
}

impl Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for RefId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for RefId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RefId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Outcome of one scheduler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub succeeded: BTreeSet<RefId>,
    pub failed: BTreeSet<RefId>,
    /// The run stopped because an external interrupt arrived
    pub interrupted: bool,
    /// The run stopped because the global deadline passed
    pub out_of_time: bool,
}

impl RunResult {
    pub fn had_failure(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Number of jobs that were started
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}
