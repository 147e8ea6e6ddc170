//! The bundled sample store and reference backend driven by the runner.

use std::io::Write;
use trackreg_core::data::{JsonlDataset, JsonlOptions};
use trackreg_core::model::{MeanRegressor, ModelParams};
use trackreg_core::{TrainConfig, TrainingRunner};

fn write_samples(path: &std::path::Path) {
    let mut file = std::fs::File::create(path).unwrap();
    for (split, n) in [("train", 8), ("valid", 2), ("test", 2)] {
        for i in 0..n {
            let lat = 3.0 + i as f64 * 0.5;
            writeln!(
                file,
                r#"{{"split": "{split}", "scene": [{i}, 1, 2, 3], "track": [{i}, {lat}, 20.0, 120.0, 900.0, 0.8]}}"#
            )
            .unwrap();
        }
    }
}

#[test]
fn reference_backend_trains_and_resumes() {
    let dir = tempfile::TempDir::new().unwrap();
    let data = dir.path().join("samples.jsonl");
    write_samples(&data);

    let mut config = TrainConfig::default();
    config.data.batch_size = 3;
    config.training.epochs = 2;
    config.training.ckpt_dir = dir.path().join("ckpt");
    config.training.summaries_dir = dir.path().join("summaries");
    config.validate().unwrap();

    let opts = JsonlOptions::from_config(&config.data).unwrap();
    let mut dataset = JsonlDataset::open(&data, opts.clone()).unwrap();
    let mut model = MeanRegressor::new(ModelParams::from(&config.model));

    let report = TrainingRunner::new(&config)
        .run(&mut dataset, &mut model)
        .unwrap();
    assert_eq!(report.metrics.epochs_completed(), 2);
    let first = report.metrics.epochs[0].train_error.unwrap();
    let second = report.metrics.epochs[1].train_error.unwrap();
    assert!(second < first, "{second} !< {first}");
    assert_eq!(model.steps(), 6);

    let mut dataset = JsonlDataset::open(&data, opts).unwrap();
    let mut restored = MeanRegressor::new(ModelParams::from(&config.model));
    let report = TrainingRunner::new(&config)
        .run(&mut dataset, &mut restored)
        .unwrap();
    assert_eq!(report.resume_offset, 2);
    assert_eq!(restored.steps(), 12);
}
