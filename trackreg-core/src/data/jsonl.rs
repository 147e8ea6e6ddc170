//! Reference sample store backed by a JSON-lines file.
//!
//! Each line is one sample: `{"split": "train", "scene": [...], "track": [...]}`
//! with an optional `"shape"` for the scene. Scenes are scaled once at load
//! time; tracks are trimmed and normalized per request.

use crate::config::DataConfig;
use crate::data::{Batch, BatchRequest, Dataset, Split};
use crate::error::{Result, TrackRegError};
use crate::numeric::MinMaxNormalizer;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::path::Path;

/// Batching and normalization options for [`JsonlDataset`].
#[derive(Debug, Clone)]
pub struct JsonlOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    pub seed: u64,
    pub use_valid: bool,
    pub track_norm: Option<MinMaxNormalizer>,
    /// Scene values are divided by this when set.
    pub input_scale: Option<f64>,
}

impl JsonlOptions {
    pub fn from_config(config: &DataConfig) -> Result<Self> {
        Ok(Self {
            batch_size: config.batch_size,
            shuffle: config.shuffle,
            seed: config.seed,
            use_valid: config.use_valid,
            track_norm: Some(config.norm.normalizer()?),
            input_scale: config
                .norm
                .input_norm
                .then_some(config.norm.input_norm_scale),
        })
    }
}

/// A single scene and its raw track row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sample {
    pub split: Split,
    pub scene: Vec<f32>,
    #[serde(default)]
    pub shape: Option<Vec<usize>>,
    pub track: Vec<f32>,
}

impl Sample {
    pub fn new(split: Split, scene: Vec<f32>, track: Vec<f32>) -> Self {
        Self {
            split,
            scene,
            shape: None,
            track,
        }
    }

    fn scene_shape(&self) -> Vec<usize> {
        self.shape.clone().unwrap_or_else(|| vec![self.scene.len()])
    }
}

#[derive(Debug, Default)]
struct SplitState {
    samples: Vec<Sample>,
    order: Vec<usize>,
    cursor: usize,
}

/// In-memory dataset loaded from JSON lines.
#[derive(Debug)]
pub struct JsonlDataset {
    splits: [SplitState; 3],
    scene_shape: Vec<usize>,
    opts: JsonlOptions,
    rng: StdRng,
}

impl JsonlDataset {
    /// Read every sample in `path`.
    pub fn open(path: &Path, opts: JsonlOptions) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrackRegError::dataset(format!("cannot read {}: {e}", path.display()))
        })?;

        let mut samples = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let sample: Sample = serde_json::from_str(line).map_err(|e| {
                TrackRegError::dataset(format!("{}:{}: {e}", path.display(), lineno + 1))
            })?;
            samples.push(sample);
        }

        let dataset = Self::from_samples(samples, opts)?;
        tracing::info!(
            path = %path.display(),
            train = dataset.len(Split::Train),
            valid = dataset.len(Split::Valid),
            test = dataset.len(Split::Test),
            "Loaded samples"
        );
        Ok(dataset)
    }

    pub fn from_samples(samples: Vec<Sample>, opts: JsonlOptions) -> Result<Self> {
        if opts.batch_size == 0 {
            return Err(TrackRegError::invalid_input("batch_size must be > 0"));
        }

        let mut splits: [SplitState; 3] = Default::default();
        let mut scene_shape: Option<Vec<usize>> = None;

        for mut sample in samples {
            if sample.split == Split::Valid && !opts.use_valid {
                continue;
            }
            let shape = sample.scene_shape();
            if shape.iter().product::<usize>() != sample.scene.len() {
                return Err(TrackRegError::dataset(format!(
                    "scene of {} values does not fit shape {shape:?}",
                    sample.scene.len()
                )));
            }
            match &scene_shape {
                None => scene_shape = Some(shape),
                Some(expected) if *expected != shape => {
                    return Err(TrackRegError::dataset(format!(
                        "scene shape {shape:?} differs from {expected:?}"
                    )));
                }
                Some(_) => {}
            }
            if let Some(scale) = opts.input_scale {
                for v in &mut sample.scene {
                    *v = (f64::from(*v) / scale) as f32;
                }
            }
            splits[sample.split.index()].samples.push(sample);
        }

        let mut rng = StdRng::seed_from_u64(opts.seed);
        for (idx, state) in splits.iter_mut().enumerate() {
            state.order = (0..state.samples.len()).collect();
            if idx == Split::Train.index() && opts.shuffle {
                state.order.shuffle(&mut rng);
            }
        }

        Ok(Self {
            splits,
            scene_shape: scene_shape.unwrap_or_default(),
            opts,
            rng,
        })
    }

    /// Samples in `split`.
    pub fn len(&self, split: Split) -> usize {
        self.splits[split.index()].samples.len()
    }

    fn track_row(&self, sample: &Sample, request: &BatchRequest) -> Result<Vec<f32>> {
        let end = sample
            .track
            .len()
            .checked_sub(usize::from(request.skip_conf))
            .filter(|end| *end > request.start_idx)
            .ok_or_else(|| {
                TrackRegError::dataset(format!(
                    "track of {} values leaves nothing after start_idx {} (skip_conf={})",
                    sample.track.len(),
                    request.start_idx,
                    request.skip_conf
                ))
            })?;
        let mut row = sample.track[request.start_idx..end].to_vec();
        if let Some(norm) = &self.opts.track_norm {
            norm.normalize_row(&mut row)
                .map_err(|e| TrackRegError::dataset(e.to_string()))?;
        }
        Ok(row)
    }
}

impl Dataset for JsonlDataset {
    fn iter_size(&self, split: Split) -> usize {
        self.len(split).div_ceil(self.opts.batch_size)
    }

    fn next_batch(&mut self, split: Split, request: &BatchRequest) -> Result<Batch> {
        let total = self.len(split);
        if total == 0 {
            return Err(TrackRegError::dataset(format!("{split} split is empty")));
        }

        let idx = split.index();
        if self.splits[idx].cursor >= total {
            self.splits[idx].cursor = 0;
            if split == Split::Train && self.opts.shuffle {
                self.splits[idx].order.shuffle(&mut self.rng);
            }
        }

        let start = self.splits[idx].cursor;
        let end = (start + self.opts.batch_size).min(total);
        self.splits[idx].cursor = end;

        let mut scenes = Vec::new();
        let mut tracks = Vec::new();
        let mut track_dim = 0;
        for &pos in &self.splits[idx].order[start..end] {
            let sample = &self.splits[idx].samples[pos];
            let row = self.track_row(sample, request)?;
            if track_dim != 0 && row.len() != track_dim {
                return Err(TrackRegError::dataset("track rows differ in length"));
            }
            track_dim = row.len();
            scenes.extend_from_slice(&sample.scene);
            tracks.extend(row);
        }

        Ok(Batch {
            scenes,
            scene_shape: self.scene_shape.clone(),
            tracks,
            track_dim,
        })
    }
}
