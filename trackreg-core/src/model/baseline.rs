//! Mean-of-targets reference backend.
//!
//! Predicts the running mean of every track coordinate seen during training.
//! Useful as a floor for real networks and to drive the runner end to end.

use crate::data::Batch;
use crate::error::{Result, TrackRegError};
use crate::model::{ModelParams, Regressor, Summary, TrainOutput};
use crate::numeric;
use crate::persistence;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct MeanState {
    mean: Vec<f64>,
    seen: u64,
    steps: u64,
}

#[derive(Debug, Clone)]
pub struct MeanRegressor {
    params: ModelParams,
    state: MeanState,
}

impl MeanRegressor {
    pub fn new(params: ModelParams) -> Self {
        Self {
            params,
            state: MeanState::default(),
        }
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Train steps taken, including those restored from a checkpoint.
    pub fn steps(&self) -> u64 {
        self.state.steps
    }

    pub fn prediction(&self) -> &[f64] {
        &self.state.mean
    }

    fn check_dim(&self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Err(TrackRegError::model("empty batch"));
        }
        if !self.state.mean.is_empty() && self.state.mean.len() != batch.track_dim {
            return Err(TrackRegError::model(format!(
                "batch has {} coordinates, model was fit on {}",
                batch.track_dim,
                self.state.mean.len()
            )));
        }
        Ok(())
    }

    fn loss(&self, batch: &Batch) -> f64 {
        let pred: Vec<f32> = if self.state.mean.is_empty() {
            vec![0.0; batch.tracks.len()]
        } else {
            batch
                .track_rows()
                .flat_map(|_| self.state.mean.iter().map(|m| *m as f32))
                .collect()
        };
        numeric::rmse(&pred, &batch.tracks).unwrap_or(f64::NAN)
    }
}

impl Regressor for MeanRegressor {
    fn train_step(&mut self, batch: &Batch) -> Result<TrainOutput> {
        self.check_dim(batch)?;
        let loss = self.loss(batch);

        if self.state.mean.is_empty() {
            self.state.mean = vec![0.0; batch.track_dim];
        }
        for row in batch.track_rows() {
            self.state.seen += 1;
            let n = self.state.seen as f64;
            for (m, v) in self.state.mean.iter_mut().zip(row) {
                *m += (f64::from(*v) - *m) / n;
            }
        }
        self.state.steps += 1;

        let summary = Summary::default()
            .scalar("rmse", loss)
            .scalar("samples_seen", self.state.seen as f64);
        Ok(TrainOutput {
            loss,
            summary: Some(summary),
        })
    }

    fn eval_step(&mut self, batch: &Batch) -> Result<f64> {
        self.check_dim(batch)?;
        Ok(self.loss(batch))
    }

    fn save(&self, path: &Path) -> Result<()> {
        persistence::atomic_write_json(path, &self.state)?;
        Ok(())
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        self.state = persistence::load_json(path)?
            .ok_or_else(|| TrackRegError::not_found(format!("model state {}", path.display())))?;
        Ok(())
    }
}
