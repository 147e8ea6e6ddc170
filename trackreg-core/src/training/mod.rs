//! Training infrastructure — runner, checkpoints, metrics, callbacks.

pub mod callbacks;
pub mod checkpoint;
pub mod metrics;
pub mod runner;

pub use callbacks::{CallbackAction, EarlyStopping, EpochCallback, NonFiniteGuard};
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use metrics::{EpochRecord, TrainingMetrics};
pub use runner::{RunReport, TrainingRunner};
