//! Regressor seam.
//!
//! Networks live in an external computation framework. The runner only calls
//! a train step, an eval step, and save/restore of the backend's own state.

pub mod baseline;

pub use baseline::MeanRegressor;

use crate::config::ModelConfig;
use crate::data::Batch;
use crate::error::{Result, TrackRegError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Network family requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NetworkKind {
    #[default]
    #[serde(rename = "simple")]
    Simple,
    #[serde(rename = "cplx")]
    Complex,
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NetworkKind::Simple => "simple",
            NetworkKind::Complex => "cplx",
        })
    }
}

impl FromStr for NetworkKind {
    type Err = TrackRegError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "simple" => Ok(NetworkKind::Simple),
            "cplx" => Ok(NetworkKind::Complex),
            other => Err(TrackRegError::config(format!(
                "unknown network type '{other}' (expected 'simple' or 'cplx')"
            ))),
        }
    }
}

/// Hyper-parameters forwarded to the backend unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub network: NetworkKind,
    pub conv_act_policy: String,
    pub flat_act_policy: String,
    pub batch_norm: bool,
    pub optimizer: String,
    pub learning_rate: f64,
}

impl From<&ModelConfig> for ModelParams {
    fn from(config: &ModelConfig) -> Self {
        Self {
            network: config.network_type,
            conv_act_policy: config.conv_act_policy.clone(),
            flat_act_policy: config.flat_act_policy.clone(),
            batch_norm: config.batch_norm,
            optimizer: config.optimizer.clone(),
            learning_rate: config.learning_rate,
        }
    }
}

/// Per-step artifact emitted by a train step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub scalars: BTreeMap<String, f64>,
}

impl Summary {
    pub fn scalar(mut self, name: impl Into<String>, value: f64) -> Self {
        self.scalars.insert(name.into(), value);
        self
    }
}

/// Result of one train step.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutput {
    pub loss: f64,
    pub summary: Option<Summary>,
}

/// A trainable regressor.
pub trait Regressor {
    /// Run one optimization step on `batch`.
    fn train_step(&mut self, batch: &Batch) -> Result<TrainOutput>;

    /// Evaluate `batch` without updating state.
    fn eval_step(&mut self, batch: &Batch) -> Result<f64>;

    /// Persist backend state to `path`.
    fn save(&self, path: &Path) -> Result<()>;

    /// Replace backend state with the one stored at `path`.
    fn restore(&mut self, path: &Path) -> Result<()>;
}

impl<R: Regressor + ?Sized> Regressor for Box<R> {
    fn train_step(&mut self, batch: &Batch) -> Result<TrainOutput> {
        (**self).train_step(batch)
    }

    fn eval_step(&mut self, batch: &Batch) -> Result<f64> {
        (**self).eval_step(batch)
    }

    fn save(&self, path: &Path) -> Result<()> {
        (**self).save(path)
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        (**self).restore(path)
    }
}

/// Build the bundled backend for `params`.
pub fn build_regressor(params: ModelParams) -> Box<dyn Regressor + Send> {
    tracing::debug!(network = %params.network, optimizer = %params.optimizer, "Building regressor");
    Box::new(MeanRegressor::new(params))
}
