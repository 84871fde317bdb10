//! In-place gzip of snapshot directories
//!
//! A durable snapshot keeps its `*.db` and `*.json` artifacts as `*.gz`
//! siblings. `compress_tree` and `decompress_tree` flip a directory between
//! the two forms, one file at a time, with the same replace-the-original
//! behaviour as `gzip -f` / `gzip -df`.

use crate::atomic_file::AtomicFile;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use globset::{Glob, GlobSet, GlobSetBuilder};
use stackscore_core::{Error, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const PLAIN_PATTERN: &str = "**/*.{db,json}";
const COMPRESSED_PATTERN: &str = "**/*.{db,json}.gz";
const GZ_EXTENSION: &str = "gz";

/// Gzip every `*.db`/`*.json` file under `root`, replacing the originals.
///
/// Returns the number of files compressed.
pub fn compress_tree(root: &Path) -> Result<usize> {
    let files = matching_files(root, PLAIN_PATTERN)?;
    for file in &files {
        gzip_file(file)?;
    }
    Ok(files.len())
}

/// Reverse of [`compress_tree`].
pub fn decompress_tree(root: &Path) -> Result<usize> {
    let files = matching_files(root, COMPRESSED_PATTERN)?;
    for file in &files {
        gunzip_file(file)?;
    }
    Ok(files.len())
}

/// Compress `path` to `path.gz` and remove `path`.
pub fn gzip_file(path: &Path) -> Result<PathBuf> {
    let target = gz_path(path);
    let mut input = open(path)?;

    let mut output = AtomicFile::create(&target)?;
    {
        let mut encoder = GzEncoder::new(BufWriter::new(&mut output), Compression::default());
        io::copy(&mut input, &mut encoder)
            .and_then(|_| encoder.finish())
            .and_then(|mut writer| writer.flush())
            .map_err(|e| Error::file_system(path, "gzip", e))?;
    }
    output.commit()?;

    fs::remove_file(path).map_err(|e| Error::file_system(path, "remove after gzip", e))?;
    Ok(target)
}

/// Decompress `path` (ending in `.gz`) next to itself and remove `path`.
pub fn gunzip_file(path: &Path) -> Result<PathBuf> {
    if path.extension().and_then(|e| e.to_str()) != Some(GZ_EXTENSION) {
        return Err(Error::configuration(format!(
            "'{}' has no .gz extension",
            path.display()
        )));
    }
    let target = path.with_extension("");
    let mut decoder = GzDecoder::new(open(path)?);

    let mut output = AtomicFile::create(&target)?;
    {
        let mut writer = BufWriter::new(&mut output);
        io::copy(&mut decoder, &mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| Error::file_system(path, "gunzip", e))?;
    }
    output.commit()?;

    fs::remove_file(path).map_err(|e| Error::file_system(path, "remove after gunzip", e))?;
    Ok(target)
}

fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(GZ_EXTENSION);
    PathBuf::from(name)
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::file_system(path, "open", e))
}

fn matching_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let globs = build_globset(pattern)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::file_system(path, "walk snapshot directory", io::Error::from(e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if globs.is_match(relative) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

fn build_globset(pattern: &str) -> Result<GlobSet> {
    let glob = Glob::new(pattern)
        .map_err(|e| Error::configuration(format!("invalid glob '{pattern}': {e}")))?;
    GlobSetBuilder::new()
        .add(glob)
        .build()
        .map_err(|e| Error::configuration(format!("invalid glob '{pattern}': {e}")))
}
