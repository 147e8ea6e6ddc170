//! Checkpoint management for training runs.
//!
//! Checkpoints are named `{model_name}-{step}` inside the checkpoint
//! directory. A JSON manifest lists the retained ones, oldest first; the last
//! entry is the one a new run resumes from.

use crate::error::{Result, TrackRegError};
use crate::model::Regressor;
use crate::persistence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// File name of the checkpoint manifest.
pub const MANIFEST_FILE: &str = "checkpoint.json";

/// A saved checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub name: String,
    pub step: usize,
    /// Where the file was written. Entries handed out by the manager carry
    /// `{dir}/{name}` so a moved checkpoint directory still resolves.
    #[serde(default)]
    pub path: PathBuf,
    /// sha256 of the saved file, empty when the backend saved a directory.
    pub hash: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub valid_error: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Checkpoint manager.
///
/// Several models may share one directory and manifest; a manager only sees
/// and prunes entries named after its own model.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    model_name: String,
    max_to_keep: usize,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, model_name: impl Into<String>, max_to_keep: usize) -> Self {
        Self {
            dir: dir.into(),
            model_name: model_name.into(),
            max_to_keep: max_to_keep.max(1),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Path a checkpoint for `step` is written to.
    pub fn path_for(&self, step: usize) -> PathBuf {
        self.dir.join(format!("{}-{step}", self.model_name))
    }

    /// Retained checkpoints of this model, oldest first.
    pub fn list(&self) -> Result<Vec<Checkpoint>> {
        Ok(self
            .manifest()?
            .into_iter()
            .filter(|c| self.owns(c))
            .map(|mut c| {
                c.path = self.dir.join(&c.name);
                c
            })
            .collect())
    }

    /// The most recent checkpoint whose file is still on disk.
    pub fn latest(&self) -> Result<Option<Checkpoint>> {
        let Some(last) = self.list()?.pop() else {
            return Ok(None);
        };
        if !last.path.exists() {
            tracing::warn!(
                checkpoint = %last.name,
                path = %last.path.display(),
                "Manifest names a checkpoint that is missing on disk"
            );
            return Ok(None);
        }
        Ok(Some(last))
    }

    /// Checkpoint with the lowest validation error.
    pub fn best(&self) -> Result<Option<Checkpoint>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| c.valid_error.is_some_and(f64::is_finite))
            .min_by(|a, b| {
                a.valid_error
                    .partial_cmp(&b.valid_error)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }))
    }

    /// Step the next run starts numbering from: latest step + 1, or 0.
    pub fn resume_offset(&self) -> Result<usize> {
        Ok(self.latest()?.map_or(0, |c| c.step + 1))
    }

    /// Restore `model` from the latest checkpoint, if there is one.
    pub fn restore_latest<R: Regressor + ?Sized>(&self, model: &mut R) -> Result<Option<Checkpoint>> {
        let Some(latest) = self.latest()? else {
            return Ok(None);
        };

        if let Some((hash, _)) = file_digest(&latest.path)? {
            if !latest.hash.is_empty() && hash != latest.hash {
                return Err(TrackRegError::checkpoint(format!(
                    "{} failed integrity check",
                    latest.name
                )));
            }
        }

        tracing::info!(model = %self.model_name, checkpoint = %latest.name, "Started restoring model");
        model.restore(&latest.path)?;
        tracing::info!(model = %self.model_name, checkpoint = %latest.name, "Model restored");
        Ok(Some(latest))
    }

    /// Save `model` as step `step` and prune this model's entries beyond
    /// `max_to_keep`. Entries of other models are left untouched.
    pub fn save<R: Regressor + ?Sized>(
        &self,
        model: &R,
        step: usize,
        valid_error: Option<f64>,
    ) -> Result<Checkpoint> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(step);
        model.save(&path)?;

        let (hash, size_bytes) = file_digest(&path)?.unwrap_or_default();
        let checkpoint = Checkpoint {
            name: format!("{}-{step}", self.model_name),
            step,
            path,
            hash,
            size_bytes,
            valid_error: valid_error.filter(|v| v.is_finite()),
            created_at: Utc::now(),
        };

        let (mut ours, others): (Vec<_>, Vec<_>) =
            self.manifest()?.into_iter().partition(|c| self.owns(c));
        ours.retain(|c| c.step != step);
        ours.push(checkpoint.clone());

        while ours.len() > self.max_to_keep {
            let old = ours.remove(0);
            remove_checkpoint_files(&self.dir.join(&old.name));
            tracing::debug!(checkpoint = %old.name, "Pruned checkpoint");
        }

        let manifest: Vec<_> = others.into_iter().chain(ours).collect();
        persistence::atomic_write_json(&self.manifest_path(), &manifest)?;
        Ok(checkpoint)
    }

    /// Every manifest entry, whatever model wrote it.
    fn manifest(&self) -> Result<Vec<Checkpoint>> {
        Ok(persistence::load_json(&self.manifest_path())?.unwrap_or_default())
    }

    fn owns(&self, checkpoint: &Checkpoint) -> bool {
        step_from_name(&self.model_name, &checkpoint.name) == Some(checkpoint.step)
    }
}

/// Parse the step out of a `{model_name}-{step}` checkpoint name.
pub fn step_from_name(model_name: &str, name: &str) -> Option<usize> {
    name.strip_prefix(model_name)?
        .strip_prefix('-')?
        .parse()
        .ok()
}

fn file_digest(path: &Path) -> Result<Option<(String, u64)>> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    let hash = format!("{:x}", Sha256::digest(&bytes));
    Ok(Some((hash, bytes.len() as u64)))
}

fn remove_checkpoint_files(path: &Path) {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    if let Err(e) = result {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove old checkpoint");
        }
    }
}
