//! Dataset seam consumed by the training runner.
//!
//! The runner only needs two things from a data source: how many batches make
//! up one pass over a split, and the next batch of that split.

pub mod jsonl;

pub use jsonl::{JsonlDataset, JsonlOptions, Sample};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dataset partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub(crate) fn index(self) -> usize {
        match self {
            Split::Train => 0,
            Split::Valid => 1,
            Split::Test => 2,
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        })
    }
}

/// Per-fetch options passed with every batch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Drop the trailing confidence element of each track.
    pub skip_conf: bool,
    /// Leading scene rows the source may discard.
    pub scrap: usize,
    /// First track element handed to the model.
    pub start_idx: usize,
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self {
            skip_conf: true,
            scrap: 2,
            start_idx: 1,
        }
    }
}

/// A batch of scenes and their target tracks, both row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub scenes: Vec<f32>,
    /// Shape of a single scene.
    pub scene_shape: Vec<usize>,
    pub tracks: Vec<f32>,
    /// Coordinates per track row.
    pub track_dim: usize,
}

impl Batch {
    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        if self.track_dim == 0 {
            0
        } else {
            self.tracks.len() / self.track_dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Track rows of the batch.
    pub fn track_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.tracks.chunks(self.track_dim.max(1))
    }
}

/// A source of batches for every split.
pub trait Dataset {
    /// Batches in one pass over `split`. Zero means the split is unavailable.
    fn iter_size(&self, split: Split) -> usize;

    /// The next batch of `split`, wrapping around at the end of a pass.
    fn next_batch(&mut self, split: Split, request: &BatchRequest) -> Result<Batch>;
}

impl<D: Dataset + ?Sized> Dataset for Box<D> {
    fn iter_size(&self, split: Split) -> usize {
        (**self).iter_size(split)
    }

    fn next_batch(&mut self, split: Split, request: &BatchRequest) -> Result<Batch> {
        (**self).next_batch(split, request)
    }
}
