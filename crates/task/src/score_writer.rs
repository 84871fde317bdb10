//! Streaming gzip writer for one reference's score output

use crate::supervisor::ChunkSink;
use flate2::write::GzEncoder;
use flate2::Compression;
use stackscore_core::constants::SCORE_FILE_SUFFIX;
use stackscore_core::{Error, RefId, Result};
use stackscore_utils::AtomicFile;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Compresses score output into `<scores_dir>/<hex(ref)>.json.gz`.
///
/// Bytes land in a temporary file next to the target. [`finish`] renames it
/// into place; dropping or [`discard`]ing the writer leaves any previous
/// result untouched.
///
/// [`finish`]: ScoreWriter::finish
/// [`discard`]: ScoreWriter::discard
pub struct ScoreWriter {
    encoder: GzEncoder<BufWriter<AtomicFile>>,
    path: PathBuf,
    bytes_in: u64,
}

impl ScoreWriter {
    pub fn create(scores_dir: &Path, reference: &RefId) -> Result<Self> {
        let path = Self::result_path(scores_dir, reference);
        let file = AtomicFile::create(&path)?;
        Ok(Self {
            encoder: GzEncoder::new(BufWriter::new(file), Compression::best()),
            path,
            bytes_in: 0,
        })
    }

    pub fn result_path(scores_dir: &Path, reference: &RefId) -> PathBuf {
        scores_dir.join(format!("{}{}", reference.hex(), SCORE_FILE_SUFFIX))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Uncompressed bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_in
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.encoder
            .write_all(chunk)
            .map_err(|e| Error::file_system(&self.path, "write score output", e))?;
        self.bytes_in += chunk.len() as u64;
        Ok(())
    }

    /// Flush the gzip trailer and move the result into place.
    pub fn finish(self) -> Result<PathBuf> {
        let path = self.path;
        let file = self
            .encoder
            .finish()
            .and_then(|writer| writer.into_inner().map_err(|e| e.into_error()))
            .map_err(|e| Error::file_system(&path, "finish score output", e))?;
        file.commit()?;
        Ok(path)
    }

    pub fn discard(self) {
        tracing::debug!(path = %self.path.display(), "Discarding partial score output");
    }
}

impl ChunkSink for ScoreWriter {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        ScoreWriter::write_chunk(self, chunk)
    }
}
