//! Freshness ledger
//!
//! Persisted twice in the scores directory: `meta.json` for humans and
//! `meta.json.gz` for consumers. Loading prefers the compressed form. A
//! missing, corrupt or foreign-version ledger is treated as empty so a bad
//! file never blocks a run.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use stackscore_core::constants::{LEDGER_FILE, LEDGER_GZ_FILE, LEDGER_VERSION};
use stackscore_core::{Error, RefId, Result};
use stackscore_utils::write_atomic;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Operations the scheduler and the CLI need from a ledger
pub trait Freshness {
    /// True when `name` has no known reference, its reference was never
    /// scored, or it was last scored at or before `now - max_age`.
    fn package_has_age(&self, name: &str, max_age: Duration) -> bool;

    /// Known references for `names`, misses dropped, first occurrence kept.
    fn refs_for(&self, names: &[String]) -> Vec<RefId>;

    /// Mark `reference` as scored now.
    fn bump_score(&mut self, reference: &RefId) -> Result<()>;

    /// Merge newly resolved package references.
    fn store_refs(&mut self, refs: &IndexMap<String, RefId>) -> Result<()>;
}

/// On-disk shape of the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub version: u32,
    /// Reference to last-scored time, newest first
    #[serde(default)]
    pub source_cred_refs: IndexMap<RefId, DateTime<Utc>>,
    /// Package name to reference, ordered by reference
    #[serde(default)]
    pub package_refs: IndexMap<String, RefId>,
}

impl Default for LedgerRecord {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            source_cred_refs: IndexMap::new(),
            package_refs: IndexMap::new(),
        }
    }
}

/// File-backed ledger rooted in one directory
#[derive(Debug)]
pub struct MetaLedger {
    plain_path: PathBuf,
    gz_path: PathBuf,
    record: LedgerRecord,
}

impl MetaLedger {
    /// Load the ledger stored in `dir`, or start empty.
    pub fn open(dir: &Path) -> Self {
        let plain_path = dir.join(LEDGER_FILE);
        let gz_path = dir.join(LEDGER_GZ_FILE);
        let record = load_record(&plain_path, &gz_path);
        tracing::debug!(
            packages = record.package_refs.len(),
            references = record.source_cred_refs.len(),
            "Loaded freshness ledger"
        );

        Self {
            plain_path,
            gz_path,
            record,
        }
    }

    pub fn record(&self) -> &LedgerRecord {
        &self.record
    }

    pub fn reference_for(&self, name: &str) -> Option<&RefId> {
        self.record.package_refs.get(name)
    }

    pub fn last_scored(&self, reference: &RefId) -> Option<DateTime<Utc>> {
        self.record.source_cred_refs.get(reference).copied()
    }

    /// [`Freshness::package_has_age`] against an explicit clock.
    pub fn package_has_age_at(&self, name: &str, max_age: Duration, now: DateTime<Utc>) -> bool {
        let found = self
            .reference_for(name)
            .and_then(|reference| self.last_scored(reference));

        let Some(scored_at) = found else {
            tracing::debug!(package = %name, "No score known, needs loading");
            return true;
        };

        let stale = match chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        {
            Some(cutoff) => scored_at <= cutoff,
            // An age beyond what chrono can represent reaches past any score
            None => false,
        };
        tracing::debug!(package = %name, %scored_at, stale, "Compared score age");
        stale
    }

    /// [`Freshness::bump_score`] against an explicit clock.
    ///
    /// Timestamps never move backwards, even if the clock does.
    pub fn bump_score_at(&mut self, reference: &RefId, at: DateTime<Utc>) -> Result<()> {
        let scored_at = match self.last_scored(reference) {
            Some(previous) if previous > at => previous,
            _ => at,
        };
        self.record
            .source_cred_refs
            .insert(reference.clone(), scored_at);
        self.record.source_cred_refs.sort_by(|_, a, _, b| b.cmp(a));
        self.flush()
    }

    /// Write both the plain and the compressed form.
    pub fn flush(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.record)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::file_system(&self.gz_path, "compress ledger", e))
            .and_then(|compressed| {
                write_atomic(&self.plain_path, &json)?;
                write_atomic(&self.gz_path, &compressed)
            })
    }
}

impl Freshness for MetaLedger {
    fn package_has_age(&self, name: &str, max_age: Duration) -> bool {
        self.package_has_age_at(name, max_age, Utc::now())
    }

    fn refs_for(&self, names: &[String]) -> Vec<RefId> {
        names
            .iter()
            .filter_map(|name| self.reference_for(name).cloned())
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect()
    }

    fn bump_score(&mut self, reference: &RefId) -> Result<()> {
        self.bump_score_at(reference, Utc::now())
    }

    fn store_refs(&mut self, refs: &IndexMap<String, RefId>) -> Result<()> {
        for (name, reference) in refs {
            self.record
                .package_refs
                .insert(name.clone(), reference.clone());
        }
        // Stable sort: packages sharing a reference keep their relative order
        self.record.package_refs.sort_by(|_, a, _, b| a.cmp(b));
        self.flush()
    }
}

fn load_record(plain_path: &Path, gz_path: &Path) -> LedgerRecord {
    match read_gz(gz_path) {
        Ok(bytes) => return parse_record(&bytes, gz_path),
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            tracing::warn!(path = %gz_path.display(), error = %e, "Problem loading ledger");
            return LedgerRecord::default();
        }
    }

    match fs::read(plain_path) {
        Ok(bytes) => parse_record(&bytes, plain_path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerRecord::default(),
        Err(e) => {
            tracing::warn!(path = %plain_path.display(), error = %e, "Problem loading ledger");
            LedgerRecord::default()
        }
    }
}

fn read_gz(path: &Path) -> Result<Vec<u8>> {
    let file = fs::File::open(path).map_err(|e| Error::file_system(path, "open ledger", e))?;
    let mut bytes = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .map_err(|e| Error::file_system(path, "decompress ledger", e))?;
    Ok(bytes)
}

fn parse_record(bytes: &[u8], path: &Path) -> LedgerRecord {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Problem loading ledger");
            return LedgerRecord::default();
        }
    };

    let version = value.get("version").and_then(serde_json::Value::as_u64);
    if version != Some(u64::from(LEDGER_VERSION)) {
        tracing::warn!(
            path = %path.display(),
            ?version,
            expected = LEDGER_VERSION,
            "Ignoring ledger with unknown version"
        );
        return LedgerRecord::default();
    }

    serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Problem loading ledger");
        LedgerRecord::default()
    })
}
