//! Working-directory leases for scheduled jobs
//!
//! A reference with a durable snapshot in the instances directory runs in
//! that snapshot, decompressed for the duration of the job. Every other
//! reference runs against the shared working directory; on close, the shared
//! artifact directory is diffed against the modification times recorded at
//! open. When exactly one artifact was touched it is moved into a new
//! snapshot for the reference. Several touched artifacts cannot be
//! attributed, so they are left in place.

use stackscore_config::Layout;
use stackscore_core::constants::ARTIFACT_SUBDIR;
use stackscore_core::{Error, RefId, Result};
use stackscore_utils::{compress_tree, decompress_tree, ArtifactTimes};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One job's lease on a working directory
#[derive(Debug)]
pub struct JobInstance {
    pub reference: RefId,
    /// The job runs inside its own decompressed snapshot
    pub existing_snapshot: bool,
    /// Directory handed to the tool
    pub working_dir: PathBuf,
    /// Where a promoted snapshot would be created
    pub target_snapshot_dir: Option<PathBuf>,
    /// Shared artifact times recorded at open; `None` if they could not be read
    pub prior_artifact_times: Option<ArtifactTimes>,
}

/// Whether the job holding an instance succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    Succeeded,
    Failed,
}

/// What `close` did with an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// An existing snapshot was compressed back to durable form
    Recompressed { files: usize },
    /// One modified shared artifact became a new snapshot
    Promoted {
        artifact: String,
        snapshot_dir: PathBuf,
    },
    /// No shared artifact changed
    Unchanged,
    /// Several shared artifacts changed; nothing was moved
    Ambiguous { artifacts: Vec<String> },
    /// Artifact times from open are unknown, so nothing can be diffed
    NoBaseline,
    /// The job failed; the shared directory is not diffed
    SkippedAfterFailure,
}

/// Opens and closes [`JobInstance`]s
#[derive(Debug, Clone)]
pub struct InstanceManager {
    shared_dir: PathBuf,
    instances_dir: PathBuf,
}

impl InstanceManager {
    pub fn new(shared_dir: impl Into<PathBuf>, instances_dir: impl Into<PathBuf>) -> Self {
        Self {
            shared_dir: shared_dir.into(),
            instances_dir: instances_dir.into(),
        }
    }

    pub fn from_layout(layout: &Layout) -> Self {
        Self::new(&layout.shared_dir, &layout.instances_dir)
    }

    /// Durable snapshot directory for `reference`
    pub fn snapshot_dir(&self, reference: &RefId) -> PathBuf {
        self.instances_dir.join(reference.hex())
    }

    fn shared_artifacts(&self) -> PathBuf {
        self.shared_dir.join(ARTIFACT_SUBDIR)
    }

    pub fn open(&self, reference: &RefId) -> Result<JobInstance> {
        let snapshot_dir = self.snapshot_dir(reference);

        if snapshot_dir.is_dir() {
            let files = decompress_tree(&snapshot_dir)?;
            tracing::debug!(
                reference = %reference,
                files,
                dir = %snapshot_dir.display(),
                "Opened isolated instance"
            );
            return Ok(JobInstance {
                reference: reference.clone(),
                existing_snapshot: true,
                working_dir: snapshot_dir,
                target_snapshot_dir: None,
                prior_artifact_times: None,
            });
        }

        let prior_artifact_times = match ArtifactTimes::scan(&self.shared_artifacts()) {
            Ok(times) => Some(times),
            Err(e) => {
                tracing::warn!(reference = %reference, error = %e, "Could not record artifact times");
                None
            }
        };

        Ok(JobInstance {
            reference: reference.clone(),
            existing_snapshot: false,
            working_dir: self.shared_dir.clone(),
            target_snapshot_dir: Some(snapshot_dir),
            prior_artifact_times,
        })
    }

    pub fn close(&self, instance: JobInstance, disposition: JobDisposition) -> Result<CloseOutcome> {
        let reference = &instance.reference;

        if instance.existing_snapshot {
            // Always restore the durable form, the job may have written to it
            let files = compress_tree(&instance.working_dir)?;
            tracing::debug!(reference = %reference, files, "Recompressed isolated instance");
            return Ok(CloseOutcome::Recompressed { files });
        }

        if disposition == JobDisposition::Failed {
            return Ok(CloseOutcome::SkippedAfterFailure);
        }

        let prior = match instance.prior_artifact_times.as_ref() {
            Some(prior) if !prior.is_empty() => prior,
            _ => {
                tracing::warn!(reference = %reference, "No original artifact times");
                return Ok(CloseOutcome::NoBaseline);
            }
        };

        let current = match ArtifactTimes::scan(&self.shared_artifacts()) {
            Ok(times) => times,
            Err(e) => {
                tracing::warn!(reference = %reference, error = %e, "Could not diff artifact times");
                return Ok(CloseOutcome::NoBaseline);
            }
        };

        let mut bumped = current.bumped_since(prior);
        match bumped.len() {
            0 => Ok(CloseOutcome::Unchanged),
            1 => {
                let (artifact, delta) = bumped.remove(0);
                let target = instance
                    .target_snapshot_dir
                    .clone()
                    .unwrap_or_else(|| self.snapshot_dir(reference));
                tracing::info!(
                    reference = %reference,
                    artifact = %artifact,
                    newer_by_ms = u64::try_from(delta.as_millis()).unwrap_or(u64::MAX),
                    "Moving 1 modified cache entry to new instance"
                );
                self.promote(&artifact, &target)?;
                Ok(CloseOutcome::Promoted {
                    artifact,
                    snapshot_dir: target,
                })
            }
            _ => {
                let artifacts: Vec<String> = bumped.into_iter().map(|(name, _)| name).collect();
                tracing::warn!(
                    reference = %reference,
                    artifacts = ?artifacts,
                    "Several cache entries changed, leaving them in the shared directory"
                );
                Ok(CloseOutcome::Ambiguous { artifacts })
            }
        }
    }

    /// Move one shared artifact into a compressed snapshot at `target`.
    ///
    /// The snapshot is assembled in a staging directory and renamed into
    /// place, so `target` is either absent or complete.
    fn promote(&self, artifact: &str, target: &Path) -> Result<()> {
        let source = self.shared_artifacts().join(artifact);
        let staging = self
            .instances_dir
            .join(format!(".{}.{}.staging", file_name_of(target), Uuid::new_v4().simple()));
        let staged_cache = staging.join(ARTIFACT_SUBDIR);
        let staged = staged_cache.join(artifact);

        fs::create_dir_all(&staged_cache)
            .map_err(|e| Error::file_system(&staged_cache, "create staging directory", e))?;
        move_file(&source, &staged)?;

        let finished = compress_tree(&staging).and_then(|_| {
            if target.exists() {
                fs::remove_dir_all(target)
                    .map_err(|e| Error::file_system(target, "replace snapshot", e))?;
            }
            fs::rename(&staging, target).map_err(|e| Error::file_system(target, "install snapshot", e))
        });

        if let Err(e) = finished {
            // Put the artifact back so the shared baseline keeps it
            if staged.exists() {
                let _ = move_file(&staged, &source);
            }
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        Ok(())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Rename, falling back to copy and remove across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(|e| Error::file_system(from, "copy artifact", e))?;
    fs::remove_file(from).map_err(|e| Error::file_system(from, "remove moved artifact", e))
}
