//! Subcommand handlers.

use anyhow::{Context, bail};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use trackreg_core::config::{self, CONFIG_FILE_NAME, ConfigOverrides};
use trackreg_core::data::{JsonlDataset, JsonlOptions};
use trackreg_core::model::{self, ModelParams, NetworkKind};
use trackreg_core::training::{CheckpointManager, RunReport, TrainingRunner};
use trackreg_core::{TrackRegError, TrainConfig, error_log};

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Train with the bundled reference backend, resuming from the latest checkpoint
    Train(TrainArgs),
    /// List retained checkpoints
    Checkpoints {
        /// Only show the checkpoint with the lowest validation error
        #[arg(long)]
        best: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default)]
pub(crate) struct TrainArgs {
    /// JSON-lines sample file (defaults to data.path_scene)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Number of epochs to run
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Samples per batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Checkpoint directory
    #[arg(long)]
    ckpt_dir: Option<PathBuf>,

    /// Summary directory
    #[arg(long)]
    summaries_dir: Option<PathBuf>,

    /// Checkpoint name prefix
    #[arg(long)]
    model_name: Option<String>,

    /// Network type: simple, cplx
    #[arg(long)]
    network: Option<NetworkKind>,
}

impl TrainArgs {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::default();
        overrides.data.path_scene = self.data.clone();
        overrides.data.batch_size = self.batch_size;
        overrides.model.model_name = self.model_name.clone();
        overrides.model.network_type = self.network;
        overrides.training.epochs = self.epochs;
        overrides.training.ckpt_dir = self.ckpt_dir.clone();
        overrides.training.summaries_dir = self.summaries_dir.clone();
        overrides
    }
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Write the default configuration to <workspace>/trackreg.toml
    Init,
    /// Show the effective configuration
    Show,
}

pub(crate) async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Train(args) => {
            let config = load(workspace, config_file, Some(&args.overrides()))?;
            let report = train(config).await?;
            print_report(&report);
            Ok(())
        }
        Commands::Checkpoints { best } => {
            let config = load(workspace, config_file, None)?;
            let manager = CheckpointManager::new(
                &config.training.ckpt_dir,
                &config.model.model_name,
                config.training.save_max_to_keep,
            );
            let checkpoints: Vec<_> = if best {
                manager.best()?.into_iter().collect()
            } else {
                manager.list()?
            };
            if checkpoints.is_empty() {
                println!("No checkpoints in {}", config.training.ckpt_dir.display());
            }
            for c in checkpoints {
                println!(
                    "{:<24} step {:>6}  valid {:>8}  {:>10} bytes  {}",
                    c.name,
                    c.step,
                    error_log::format_error(c.valid_error),
                    c.size_bytes,
                    c.created_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
            Ok(())
        }
        Commands::Config { action } => match action {
            ConfigAction::Init => {
                let path = workspace.join(CONFIG_FILE_NAME);
                config::write_default_config(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Wrote {}", path.display());
                Ok(())
            }
            ConfigAction::Show => {
                let config = load(workspace, config_file, None)?;
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
        },
    }
}

fn load(
    workspace: &Path,
    config_file: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> anyhow::Result<TrainConfig> {
    let mut config = config::load_config(Some(workspace), config_file, overrides)
        .context("Configuration error")?;
    resolve_paths(&mut config, workspace);
    Ok(config)
}

/// Anchor relative paths at the workspace.
fn resolve_paths(config: &mut TrainConfig, workspace: &Path) {
    let anchor = |p: &mut PathBuf| {
        if !p.as_os_str().is_empty() && p.is_relative() {
            *p = workspace.join(&*p);
        }
    };
    anchor(&mut config.data.path_scene);
    anchor(&mut config.data.path_track);
    anchor(&mut config.data.path_fold);
    if let Some(p) = config.data.path_track_exception.as_mut() {
        anchor(p);
    }
    anchor(&mut config.training.ckpt_dir);
    anchor(&mut config.training.summaries_dir);
}

async fn train(config: TrainConfig) -> anyhow::Result<RunReport> {
    if config.data.path_scene.as_os_str().is_empty() {
        bail!("no sample file: pass --data or set data.path_scene");
    }
    let opts = JsonlOptions::from_config(&config.data)?;
    let mut dataset = JsonlDataset::open(&config.data.path_scene, opts)?;
    let mut regressor = model::build_regressor(ModelParams::from(&config.model));

    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping at the next step");
            on_signal.cancel();
        }
    });

    let mut runner = TrainingRunner::new(&config).with_cancellation(token);
    let result = tokio::task::spawn_blocking(move || runner.run(&mut dataset, &mut regressor))
        .await
        .context("training task panicked")?;

    match result {
        Ok(report) => Ok(report),
        Err(TrackRegError::Cancelled { epoch }) => {
            bail!("training interrupted during epoch {epoch}; the last completed epoch is checkpointed")
        }
        Err(e) => Err(e.into()),
    }
}

fn print_report(report: &RunReport) {
    let m = &report.metrics;
    println!(
        "Completed {} epoch(s) in {:.1} s (resume offset {})",
        m.epochs_completed(),
        m.total_training_time_secs,
        report.resume_offset
    );
    if let Some(last) = m.last() {
        println!(
            "Last epoch: train {}  valid {}  test {}",
            error_log::format_error(last.train_error),
            error_log::format_error(last.valid_error),
            error_log::format_error(last.test_error),
        );
    }
    if let (Some(epoch), Some(err)) = (m.best_epoch, m.best_error) {
        println!("Best epoch: {epoch} ({err:.3})");
    }
    if let Some(c) = &report.last_checkpoint {
        println!("Saved {} -> {}", c.name, c.path.display());
    }
    if let Some(name) = report.stopped_by {
        println!("Stopped early by {name}");
    }
}
