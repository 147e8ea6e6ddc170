//! # trackreg-core — training-loop driver for track coordinate regressors
//!
//! Coordinates dataset batching, model invocation, checkpoint resume and
//! per-epoch validation/test error logging. The regression network itself is
//! a [`model::Regressor`] implementation supplied by the caller; the bundled
//! [`model::MeanRegressor`] is a reference backend.

pub mod config;
pub mod data;
pub mod error;
pub mod error_log;
pub mod model;
pub mod numeric;
pub mod persistence;
pub mod summary;
pub mod training;

pub use config::{ConfigOverrides, TrainConfig, load_config};
pub use data::{Batch, BatchRequest, Dataset, Split};
pub use error::{Result, TrackRegError};
pub use model::{NetworkKind, Regressor, Summary, TrainOutput};
pub use training::{CheckpointManager, RunReport, TrainingRunner};
