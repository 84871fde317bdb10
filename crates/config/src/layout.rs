//! Directory layout under a run root

use stackscore_core::constants::{
    ARTIFACT_SUBDIR, INSTANCES_DIR_NAME, SCORES_DIR_NAME, SHARED_DIR_NAME,
};
use stackscore_core::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Where a run keeps its shared working directory, results and snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Shared working directory used by jobs without a snapshot
    pub shared_dir: PathBuf,
    /// Compressed score results and the freshness ledger
    pub scores_dir: PathBuf,
    /// Durable per-reference snapshots
    pub instances_dir: PathBuf,
}

impl Layout {
    pub fn under(root: &Path) -> Self {
        Self {
            shared_dir: root.join(SHARED_DIR_NAME),
            scores_dir: root.join(SCORES_DIR_NAME),
            instances_dir: root.join(INSTANCES_DIR_NAME),
        }
    }

    /// Artifact directory inside the shared working directory
    pub fn shared_artifacts(&self) -> PathBuf {
        self.shared_dir.join(ARTIFACT_SUBDIR)
    }

    /// Create every directory of the layout
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.shared_dir, &self.scores_dir, &self.instances_dir] {
            fs::create_dir_all(dir).map_err(|e| Error::file_system(dir, "create directory", e))?;
        }
        Ok(())
    }
}
