//! Training runner — the epoch/iteration control flow.
//!
//! One run: resume from the latest checkpoint, then for every epoch train over
//! the whole train split, evaluate the valid and test splits, append their
//! mean errors to the error logs, and save a checkpoint.

use crate::config::TrainConfig;
use crate::data::{BatchRequest, Dataset, Split};
use crate::error::{Result, TrackRegError};
use crate::error_log::{self, ErrorLog};
use crate::model::Regressor;
use crate::numeric;
use crate::summary::{self, SummaryWriter};
use crate::training::callbacks::{CallbackAction, EarlyStopping, EpochCallback, NonFiniteGuard};
use crate::training::checkpoint::{Checkpoint, CheckpointManager};
use crate::training::metrics::{EpochRecord, TrainingMetrics};
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of a completed (or early-stopped) run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub metrics: TrainingMetrics,
    /// Step offset derived from the checkpoint the run resumed from.
    pub resume_offset: usize,
    pub resumed_from: Option<Checkpoint>,
    pub last_checkpoint: Option<Checkpoint>,
    /// Name of the callback that ended the run early.
    pub stopped_by: Option<&'static str>,
}

impl RunReport {
    pub fn stopped_early(&self) -> bool {
        self.stopped_by.is_some()
    }
}

/// Drives a [`Regressor`] over a [`Dataset`].
pub struct TrainingRunner {
    epochs: usize,
    summary_step: usize,
    ckpt_dir: PathBuf,
    summaries_dir: PathBuf,
    checkpoints: CheckpointManager,
    request: BatchRequest,
    callbacks: Vec<Box<dyn EpochCallback>>,
    cancel: CancellationToken,
}

impl TrainingRunner {
    pub fn new(config: &TrainConfig) -> Self {
        let training = &config.training;
        let mut callbacks: Vec<Box<dyn EpochCallback>> = Vec::new();
        if training.stop_on_non_finite {
            callbacks.push(Box::new(NonFiniteGuard));
        }
        if let Some(patience) = training.early_stopping_patience {
            callbacks.push(Box::new(EarlyStopping::new(patience, training.min_delta)));
        }

        Self {
            epochs: training.epochs,
            summary_step: training.summary_step,
            ckpt_dir: training.ckpt_dir.clone(),
            summaries_dir: training.summaries_dir.clone(),
            checkpoints: CheckpointManager::new(
                &training.ckpt_dir,
                &config.model.model_name,
                training.save_max_to_keep,
            ),
            request: BatchRequest::default(),
            callbacks,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop at the next iteration boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_callback(mut self, callback: Box<dyn EpochCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn with_request(mut self, request: BatchRequest) -> Self {
        self.request = request;
        self
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Run every configured epoch.
    pub fn run<D, R>(&mut self, dataset: &mut D, model: &mut R) -> Result<RunReport>
    where
        D: Dataset + ?Sized,
        R: Regressor + ?Sized,
    {
        if !self.ckpt_dir.exists() {
            tracing::warn!(path = %self.ckpt_dir.display(), "Cannot find ckpt_dir, creating it");
            std::fs::create_dir_all(&self.ckpt_dir)?;
        }

        let resumed_from = self.checkpoints.restore_latest(model)?;
        let resume_offset = resumed_from.as_ref().map_or(0, |c| c.step + 1);
        if resumed_from.is_none() {
            tracing::info!("No pre-trained model loaded, starting from scratch");
        }

        let mut summaries = SummaryWriter::create(&self.summaries_dir)?;
        let mut valid_log = ErrorLog::create(self.ckpt_dir.join(error_log::VALID_LOG))?;
        let mut test_log = ErrorLog::create(self.ckpt_dir.join(error_log::TEST_LOG))?;
        tracing::debug!(
            summaries = %summaries.path().display(),
            valid = %valid_log.path().display(),
            test = %test_log.path().display(),
            "Opened run logs"
        );

        let mut metrics = TrainingMetrics::default();
        let mut last_checkpoint = None;
        let mut stopped_by = None;

        for epoch in 0..self.epochs {
            self.check_cancelled(epoch)?;
            let shown = epoch + 1;
            let started = Instant::now();
            tracing::info!(epoch = shown, "TRAIN");

            let iters_train = dataset.iter_size(Split::Train);
            if iters_train == 0 {
                tracing::warn!(epoch = shown, "Train split has no batches");
            }
            let mut train_errors = Vec::with_capacity(iters_train);
            for it in 0..iters_train {
                self.check_cancelled(epoch)?;
                let batch = dataset.next_batch(Split::Train, &self.request)?;
                let output = model.train_step(&batch)?;

                let global_step = epoch * iters_train + it;
                if let Some(summary) = &output.summary {
                    if summary::should_write(global_step, self.summary_step) {
                        summaries.write(global_step, summary)?;
                    }
                }

                tracing::info!(epoch = shown, iter = it + 1, loss = output.loss, "Train step");
                train_errors.push(output.loss);
            }

            let train_error = numeric::mean(&train_errors);
            let elapsed_secs = started.elapsed().as_secs_f64();
            tracing::info!(
                epoch = shown,
                train_error = %error_log::format_error(train_error),
                elapsed_secs,
                "Training finished"
            );

            tracing::info!(epoch = shown, "VALID");
            let valid_error = self.evaluate(dataset, model, Split::Valid, epoch)?;
            tracing::info!(epoch = shown, valid_error = %error_log::format_error(valid_error), "Validation finished");
            valid_log.append(valid_error)?;

            tracing::info!(epoch = shown, "TEST");
            let test_error = self.evaluate(dataset, model, Split::Test, epoch)?;
            tracing::info!(epoch = shown, test_error = %error_log::format_error(test_error), "Test finished");
            test_log.append(test_error)?;

            let checkpoint = self
                .checkpoints
                .save(model, epoch + resume_offset, valid_error)?;
            tracing::info!(checkpoint = %checkpoint.name, path = %checkpoint.path.display(), "Model saved");
            last_checkpoint = Some(checkpoint);

            metrics.record_epoch(EpochRecord {
                epoch: shown,
                train_error,
                valid_error,
                test_error,
                elapsed_secs,
            });

            for callback in &mut self.callbacks {
                if callback.on_epoch_end(shown, &metrics) == CallbackAction::Stop {
                    tracing::warn!(epoch = shown, callback = callback.name(), "Stopping early");
                    stopped_by = Some(callback.name());
                    break;
                }
            }
            if stopped_by.is_some() {
                break;
            }
        }

        Ok(RunReport {
            metrics,
            resume_offset,
            resumed_from,
            last_checkpoint,
            stopped_by,
        })
    }

    fn evaluate<D, R>(
        &self,
        dataset: &mut D,
        model: &mut R,
        split: Split,
        epoch: usize,
    ) -> Result<Option<f64>>
    where
        D: Dataset + ?Sized,
        R: Regressor + ?Sized,
    {
        let iters = dataset.iter_size(split);
        let mut errors = Vec::with_capacity(iters);
        for _ in 0..iters {
            self.check_cancelled(epoch)?;
            let batch = dataset.next_batch(split, &self.request)?;
            errors.push(model.eval_step(&batch)?);
        }
        Ok(numeric::mean(&errors))
    }

    fn check_cancelled(&self, epoch: usize) -> Result<()> {
        if self.cancel.is_cancelled() {
            tracing::warn!(epoch = epoch + 1, "Training cancelled");
            return Err(TrackRegError::Cancelled { epoch: epoch + 1 });
        }
        Ok(())
    }
}
