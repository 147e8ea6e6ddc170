//! Training metrics tracking.

use serde::{Deserialize, Serialize};

/// Mean errors of one epoch. Errors are `None` when the split had no batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch within this run.
    pub epoch: usize,
    pub train_error: Option<f64>,
    pub valid_error: Option<f64>,
    pub test_error: Option<f64>,
    pub elapsed_secs: f64,
}

impl EpochRecord {
    /// Error used to rank epochs: validation when available, else training.
    pub fn monitored_error(&self) -> Option<f64> {
        self.valid_error.or(self.train_error).filter(|v| !v.is_nan())
    }
}

/// Training metrics for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs: Vec<EpochRecord>,
    pub best_epoch: Option<usize>,
    pub best_error: Option<f64>,
    pub total_training_time_secs: f64,
}

impl TrainingMetrics {
    pub fn record_epoch(&mut self, record: EpochRecord) {
        self.total_training_time_secs += record.elapsed_secs;
        if let Some(err) = record.monitored_error() {
            if self.best_error.is_none_or(|best| err < best) {
                self.best_error = Some(err);
                self.best_epoch = Some(record.epoch);
            }
        }
        self.epochs.push(record);
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs.len()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }
}
