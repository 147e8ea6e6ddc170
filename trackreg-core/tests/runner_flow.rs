//! End-to-end tests of the epoch/iteration control flow.

use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use trackreg_core::data::{Batch, BatchRequest, Dataset, Split};
use trackreg_core::error_log::{TEST_LOG, VALID_LOG};
use trackreg_core::model::{Summary, TrainOutput};
use trackreg_core::summary::EVENTS_FILE;
use trackreg_core::training::{CallbackAction, EpochCallback, TrainingMetrics};
use trackreg_core::{Regressor, Result, TrackRegError, TrainConfig, TrainingRunner};

/// Fixed number of batches per split; every batch is a single zero row.
struct FixedDataset {
    sizes: [usize; 3],
    fetched: Vec<(Split, BatchRequest)>,
}

impl FixedDataset {
    fn new(train: usize, valid: usize, test: usize) -> Self {
        Self {
            sizes: [train, valid, test],
            fetched: Vec::new(),
        }
    }

    fn count(&self, split: Split) -> usize {
        self.fetched.iter().filter(|(s, _)| *s == split).count()
    }
}

impl Dataset for FixedDataset {
    fn iter_size(&self, split: Split) -> usize {
        match split {
            Split::Train => self.sizes[0],
            Split::Valid => self.sizes[1],
            Split::Test => self.sizes[2],
        }
    }

    fn next_batch(&mut self, split: Split, request: &BatchRequest) -> Result<Batch> {
        self.fetched.push((split, *request));
        Ok(Batch {
            scenes: vec![0.0],
            scene_shape: vec![1],
            tracks: vec![0.0],
            track_dim: 1,
        })
    }
}

/// Reports scripted losses and counts its own steps.
#[derive(Default)]
struct ScriptedModel {
    train_steps: usize,
    eval_steps: usize,
    train_loss: f64,
    eval_loss: f64,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl Regressor for ScriptedModel {
    fn train_step(&mut self, _batch: &Batch) -> Result<TrainOutput> {
        self.train_steps += 1;
        if let Some((after, token)) = &self.cancel_after {
            if self.train_steps >= *after {
                token.cancel();
            }
        }
        Ok(TrainOutput {
            loss: self.train_loss,
            summary: Some(Summary::default().scalar("steps", self.train_steps as f64)),
        })
    }

    fn eval_step(&mut self, _batch: &Batch) -> Result<f64> {
        self.eval_steps += 1;
        Ok(self.eval_loss)
    }

    fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.train_steps.to_string())?;
        Ok(())
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        self.train_steps = std::fs::read_to_string(path)?
            .parse()
            .map_err(|_| TrackRegError::model("corrupt state"))?;
        Ok(())
    }
}

fn config(dir: &TempDir, epochs: usize) -> TrainConfig {
    let mut config = TrainConfig::default();
    config.model.model_name = "imglinreg".into();
    config.training.epochs = epochs;
    config.training.summary_step = 2;
    config.training.save_max_to_keep = 10;
    config.training.ckpt_dir = dir.path().join("ckpt");
    config.training.summaries_dir = dir.path().join("summaries");
    config
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn fresh_run_trains_evaluates_and_checkpoints_every_epoch() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 2);
    let mut dataset = FixedDataset::new(3, 2, 1);
    let mut model = ScriptedModel {
        train_loss: 1.0,
        eval_loss: 0.5,
        ..Default::default()
    };

    let report = TrainingRunner::new(&config)
        .run(&mut dataset, &mut model)
        .unwrap();

    assert_eq!(report.resume_offset, 0);
    assert!(report.resumed_from.is_none());
    assert_eq!(report.metrics.epochs_completed(), 2);
    assert_eq!(model.train_steps, 6);
    assert_eq!(model.eval_steps, 6);
    assert_eq!(dataset.count(Split::Train), 6);
    assert_eq!(dataset.count(Split::Valid), 4);
    assert_eq!(dataset.count(Split::Test), 2);
    assert!(
        dataset
            .fetched
            .iter()
            .all(|(_, req)| *req == BatchRequest::default())
    );

    let ckpt = config.training.ckpt_dir.clone();
    assert!(ckpt.join("imglinreg-0").exists());
    assert!(ckpt.join("imglinreg-1").exists());
    assert_eq!(report.last_checkpoint.unwrap().name, "imglinreg-1");
    assert_eq!(read(&ckpt.join(VALID_LOG)), "0.500\n0.500\n");
    assert_eq!(read(&ckpt.join(TEST_LOG)), "0.500\n0.500\n");

    let rec = &report.metrics.epochs[0];
    assert_eq!(rec.epoch, 1);
    assert_eq!(rec.train_error, Some(1.0));
}

#[test]
fn summaries_follow_global_step_throttle() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 2);
    let mut dataset = FixedDataset::new(3, 0, 0);
    let mut model = ScriptedModel::default();

    TrainingRunner::new(&config)
        .run(&mut dataset, &mut model)
        .unwrap();

    // Global steps 0..6, written when step > 0 and step % 2 == 0.
    let events = read(&config.training.summaries_dir.join("train").join(EVENTS_FILE));
    let steps: Vec<u64> = events
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["step"].as_u64().unwrap())
        .collect();
    assert_eq!(steps, vec![2, 4]);
}

#[test]
fn resume_continues_numbering_but_not_global_steps() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 2);

    let mut first = ScriptedModel::default();
    TrainingRunner::new(&config)
        .run(&mut FixedDataset::new(1, 1, 1), &mut first)
        .unwrap();

    let mut second = ScriptedModel::default();
    let report = TrainingRunner::new(&config)
        .run(&mut FixedDataset::new(1, 1, 1), &mut second)
        .unwrap();

    assert_eq!(report.resumed_from.as_ref().unwrap().name, "imglinreg-1");
    assert_eq!(report.resume_offset, 2);
    // Restored two steps, trained two more.
    assert_eq!(second.train_steps, 4);
    assert!(config.training.ckpt_dir.join("imglinreg-2").exists());
    assert_eq!(report.last_checkpoint.unwrap().name, "imglinreg-3");
    // Error logs are truncated per run.
    assert_eq!(read(&config.training.ckpt_dir.join(VALID_LOG)).lines().count(), 2);
}

#[test]
fn empty_eval_split_logs_nan() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 1);
    let mut model = ScriptedModel::default();

    let report = TrainingRunner::new(&config)
        .run(&mut FixedDataset::new(1, 0, 1), &mut model)
        .unwrap();

    assert_eq!(report.metrics.epochs[0].valid_error, None);
    assert_eq!(read(&config.training.ckpt_dir.join(VALID_LOG)), "nan\n");
}

#[test]
fn zero_epochs_only_prepares_directories() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 0);
    let mut model = ScriptedModel::default();

    let report = TrainingRunner::new(&config)
        .run(&mut FixedDataset::new(1, 1, 1), &mut model)
        .unwrap();

    assert_eq!(report.metrics.epochs_completed(), 0);
    assert!(report.last_checkpoint.is_none());
    assert_eq!(read(&config.training.ckpt_dir.join(VALID_LOG)), "");
}

#[test]
fn cancellation_stops_without_saving_partial_epoch() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 3);
    let token = CancellationToken::new();
    let mut model = ScriptedModel {
        cancel_after: Some((5, token.clone())),
        ..Default::default()
    };

    let err = TrainingRunner::new(&config)
        .with_cancellation(token)
        .run(&mut FixedDataset::new(3, 1, 1), &mut model)
        .unwrap_err();

    assert!(matches!(err, TrackRegError::Cancelled { epoch: 2 }));
    assert!(config.training.ckpt_dir.join("imglinreg-0").exists());
    assert!(!config.training.ckpt_dir.join("imglinreg-1").exists());
    // Only the completed epoch reached the error logs.
    assert_eq!(read(&config.training.ckpt_dir.join(VALID_LOG)), "0.000\n");
    assert_eq!(read(&config.training.ckpt_dir.join(TEST_LOG)), "0.000\n");
}

#[test]
fn cancelled_before_first_epoch_saves_nothing() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 3);
    let token = CancellationToken::new();
    token.cancel();
    let mut dataset = FixedDataset::new(2, 1, 1);
    let mut model = ScriptedModel::default();

    let err = TrainingRunner::new(&config)
        .with_cancellation(token)
        .run(&mut dataset, &mut model)
        .unwrap_err();

    assert!(matches!(err, TrackRegError::Cancelled { epoch: 1 }));
    assert_eq!(model.train_steps, 0);
    assert!(dataset.fetched.is_empty());
    assert!(!config.training.ckpt_dir.join("imglinreg-0").exists());
    assert_eq!(read(&config.training.ckpt_dir.join(VALID_LOG)), "");
    assert_eq!(read(&config.training.ckpt_dir.join(TEST_LOG)), "");
}

#[test]
fn early_stopping_ends_run_after_checkpoint() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir, 10);
    config.training.early_stopping_patience = Some(2);
    let mut model = ScriptedModel {
        eval_loss: 0.3,
        ..Default::default()
    };

    let report = TrainingRunner::new(&config)
        .run(&mut FixedDataset::new(1, 1, 1), &mut model)
        .unwrap();

    assert_eq!(report.stopped_by, Some("early_stopping"));
    assert_eq!(report.metrics.epochs_completed(), 3);
    assert!(config.training.ckpt_dir.join("imglinreg-2").exists());
}

#[test]
fn non_finite_train_error_stops_run() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 5);
    let mut model = ScriptedModel {
        train_loss: f64::NAN,
        ..Default::default()
    };

    let report = TrainingRunner::new(&config)
        .run(&mut FixedDataset::new(1, 1, 1), &mut model)
        .unwrap();

    assert!(report.stopped_early());
    assert_eq!(report.stopped_by, Some("non_finite_guard"));
    assert_eq!(report.metrics.epochs_completed(), 1);
}

#[test]
fn missing_ckpt_dir_is_created() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir, 1);
    config.training.ckpt_dir = dir.path().join("deep").join("ckpt");

    TrainingRunner::new(&config)
        .run(&mut FixedDataset::new(1, 1, 1), &mut ScriptedModel::default())
        .unwrap();

    assert!(config.training.ckpt_dir.join("imglinreg-0").exists());
}

/// Stops as soon as one epoch has been recorded.
struct OneEpoch;

impl EpochCallback for OneEpoch {
    fn name(&self) -> &'static str {
        "one_epoch"
    }

    fn on_epoch_end(&mut self, _epoch: usize, metrics: &TrainingMetrics) -> CallbackAction {
        if metrics.epochs_completed() >= 1 {
            CallbackAction::Stop
        } else {
            CallbackAction::Continue
        }
    }
}

#[test]
fn custom_callback_and_request_are_used() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 5);
    let request = BatchRequest {
        skip_conf: false,
        scrap: 0,
        start_idx: 0,
    };
    let mut dataset = FixedDataset::new(2, 1, 1);

    let mut runner = TrainingRunner::new(&config)
        .with_callback(Box::new(OneEpoch))
        .with_request(request);
    let report = runner
        .run(&mut dataset, &mut ScriptedModel::default())
        .unwrap();

    assert_eq!(report.stopped_by, Some("one_epoch"));
    assert_eq!(report.metrics.epochs_completed(), 1);
    assert_eq!(dataset.fetched.len(), 4);
    assert!(dataset.fetched.iter().all(|(_, req)| *req == request));

    let latest = runner.checkpoints().latest().unwrap().unwrap();
    assert_eq!(latest.name, "imglinreg-0");
    assert_eq!(latest.path, config.training.ckpt_dir.join("imglinreg-0"));
}
