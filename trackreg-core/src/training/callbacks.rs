//! Epoch-end callbacks — early stopping and non-finite loss detection.

use crate::training::metrics::TrainingMetrics;

/// Action a callback can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Trait for epoch callbacks.
pub trait EpochCallback: Send {
    fn name(&self) -> &'static str;

    /// Called after the epoch's checkpoint has been saved.
    fn on_epoch_end(&mut self, epoch: usize, metrics: &TrainingMetrics) -> CallbackAction;
}

/// Stops once the monitored error fails to improve by `min_delta` for
/// `patience` consecutive epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    pub patience: usize,
    pub min_delta: f64,
    counter: usize,
    best: Option<f64>,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            counter: 0,
            best: None,
        }
    }

    pub fn observe(&mut self, error: f64) -> CallbackAction {
        if error.is_nan() {
            return CallbackAction::Continue;
        }
        match self.best {
            Some(best) if error >= best - self.min_delta => {
                self.counter += 1;
                if self.counter >= self.patience {
                    CallbackAction::Stop
                } else {
                    CallbackAction::Continue
                }
            }
            _ => {
                self.best = Some(error);
                self.counter = 0;
                CallbackAction::Continue
            }
        }
    }
}

impl EpochCallback for EarlyStopping {
    fn name(&self) -> &'static str {
        "early_stopping"
    }

    fn on_epoch_end(&mut self, _epoch: usize, metrics: &TrainingMetrics) -> CallbackAction {
        match metrics.last().and_then(|r| r.monitored_error()) {
            Some(err) => self.observe(err),
            None => CallbackAction::Continue,
        }
    }
}

/// Stops when the train error of the last epoch is NaN or infinite.
#[derive(Debug, Clone, Default)]
pub struct NonFiniteGuard;

impl EpochCallback for NonFiniteGuard {
    fn name(&self) -> &'static str {
        "non_finite_guard"
    }

    fn on_epoch_end(&mut self, _epoch: usize, metrics: &TrainingMetrics) -> CallbackAction {
        match metrics.last().and_then(|r| r.train_error) {
            Some(err) if !err.is_finite() => CallbackAction::Stop,
            _ => CallbackAction::Continue,
        }
    }
}
