//! Modification-time snapshots of a flat artifact directory

use stackscore_core::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Modification times of every entry directly inside one directory, keyed by
/// file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactTimes {
    times: BTreeMap<String, SystemTime>,
}

impl ArtifactTimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current modification time of every entry in `dir`.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut times = BTreeMap::new();
        let entries =
            fs::read_dir(dir).map_err(|e| Error::file_system(dir, "read artifact directory", e))?;

        for entry in entries {
            let entry = entry.map_err(|e| Error::file_system(dir, "read artifact entry", e))?;
            let path = entry.path();
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(|e| Error::file_system(&path, "stat artifact", e))?;
            times.insert(entry.file_name().to_string_lossy().into_owned(), modified);
        }

        Ok(Self { times })
    }

    pub fn insert(&mut self, name: impl Into<String>, modified: SystemTime) {
        self.times.insert(name.into(), modified);
    }

    pub fn get(&self, name: &str) -> Option<SystemTime> {
        self.times.get(name).copied()
    }

    /// Entries whose time is newer than in `prior`, with how much newer.
    ///
    /// Entries missing from `prior` count as modified at the epoch.
    pub fn bumped_since(&self, prior: &ArtifactTimes) -> Vec<(String, Duration)> {
        self.times
            .iter()
            .filter_map(|(name, &now)| {
                let before = prior.get(name).unwrap_or(UNIX_EPOCH);
                now.duration_since(before)
                    .ok()
                    .filter(|delta| !delta.is_zero())
                    .map(|delta| (name.clone(), delta))
            })
            .collect()
    }

    /// Get the number of tracked artifacts
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Set the modification time of `path`.
pub fn set_modified(path: &Path, modified: SystemTime) -> Result<()> {
    let file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| Error::file_system(path, "open for mtime update", e))?;
    file.set_modified(modified)
        .map_err(|e| Error::file_system(path, "set modification time", e))
}
