//! Atomic file operations to prevent corrupted ledger and result files

use stackscore_core::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A file written under a temporary name and renamed into place on commit.
///
/// Dropping an uncommitted `AtomicFile` removes the temporary file, so the
/// target path only ever holds complete content.
#[derive(Debug)]
pub struct AtomicFile {
    file: Option<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl AtomicFile {
    pub fn create(path: &Path) -> Result<Self> {
        let parent = path.parent().ok_or_else(|| {
            Error::configuration(format!(
                "Invalid file path '{}': no parent directory",
                path.display()
            ))
        })?;

        fs::create_dir_all(parent)
            .map_err(|e| Error::file_system(parent, "create parent directory", e))?;

        // Same directory as the target so the final rename stays on one filesystem
        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::file_system(&temp_path, "create temporary file", e))?;

        Ok(Self {
            file: Some(file),
            temp_path,
            final_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.final_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Mutable access to the temporary file.
    pub fn file_mut(&mut self) -> Result<&mut File> {
        let temp_path = &self.temp_path;
        self.file.as_mut().ok_or_else(|| {
            Error::configuration(format!(
                "temporary file '{}' already closed",
                temp_path.display()
            ))
        })
    }

    /// Sync and rename the temporary file over the target path.
    pub fn commit(mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()
                .map_err(|e| Error::file_system(&self.temp_path, "sync temporary file", e))?;
        }

        fs::rename(&self.temp_path, &self.final_path)
            .map_err(|e| Error::file_system(&self.final_path, "atomic rename", e))
    }

    /// Drop the temporary file without touching the target path.
    pub fn discard(self) {
        // Drop does the cleanup
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "atomic file already closed",
            )),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        self.file.take();
        if self.temp_path.exists() {
            if let Err(e) = fs::remove_file(&self.temp_path) {
                tracing::warn!(
                    path = %self.temp_path.display(),
                    error = %e,
                    "Failed to remove temporary file"
                );
            }
        }
    }
}

/// Write data to a file atomically by writing to a temporary file and renaming
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = AtomicFile::create(path)?;
    file.write_all(content)
        .map_err(|e| Error::file_system(file.temp_path().to_path_buf(), "write to temporary file", e))?;
    file.commit()
}

/// Write string content to a file atomically
pub fn write_atomic_string(path: &Path, content: &str) -> Result<()> {
    write_atomic(path, content.as_bytes())
}
