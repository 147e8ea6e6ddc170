//! Configuration for a training run.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment -> CLI overrides. The workspace file is `trackreg.toml`;
//! environment variables use the `TRACKREG_` prefix with `__` as the section
//! separator (`TRACKREG_TRAINING__EPOCHS=5`).

use crate::error::{Result, TrackRegError};
use crate::model::NetworkKind;
use crate::numeric::MinMaxNormalizer;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the workspace-level configuration file.
pub const CONFIG_FILE_NAME: &str = "trackreg.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TRACKREG_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

/// Dataset location and batching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Scene tensor source.
    #[serde(default)]
    pub path_scene: PathBuf,
    /// Track coordinate source.
    #[serde(default)]
    pub path_track: PathBuf,
    /// Tracks excluded from every split.
    #[serde(default)]
    pub path_track_exception: Option<PathBuf>,
    /// Directory holding fold assignments.
    #[serde(default = "default_fold_dir")]
    pub path_fold: PathBuf,
    /// Fixed fold to use instead of generating one.
    #[serde(default)]
    pub preset_fold: Option<u32>,
    /// When false the validation split is empty.
    #[serde(default = "default_true")]
    pub use_valid: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Reshuffle the train split at the start of every pass.
    #[serde(default = "default_true")]
    pub shuffle: bool,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub norm: NormConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path_scene: PathBuf::new(),
            path_track: PathBuf::new(),
            path_track_exception: None,
            path_fold: default_fold_dir(),
            preset_fold: None,
            use_valid: true,
            batch_size: default_batch_size(),
            shuffle: true,
            seed: 0,
            norm: NormConfig::default(),
        }
    }
}

/// Min-max track normalization and input scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormConfig {
    #[serde(default = "default_min_list")]
    pub min_list: Vec<f64>,
    #[serde(default = "default_max_list")]
    pub max_list: Vec<f64>,
    /// Divide scene values by `input_norm_scale`.
    #[serde(default = "default_true")]
    pub input_norm: bool,
    #[serde(default = "default_input_norm_scale")]
    pub input_norm_scale: f64,
}

impl Default for NormConfig {
    fn default() -> Self {
        Self {
            min_list: default_min_list(),
            max_list: default_max_list(),
            input_norm: true,
            input_norm_scale: default_input_norm_scale(),
        }
    }
}

impl NormConfig {
    pub fn normalizer(&self) -> Result<MinMaxNormalizer> {
        MinMaxNormalizer::new(self.min_list.clone(), self.max_list.clone())
    }
}

/// Hyper-parameters handed to the regression backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Prefix of every checkpoint name.
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub network_type: NetworkKind,
    #[serde(default = "default_act_policy")]
    pub conv_act_policy: String,
    #[serde(default = "default_act_policy")]
    pub flat_act_policy: String,
    #[serde(default = "default_true")]
    pub batch_norm: bool,
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            network_type: NetworkKind::default(),
            conv_act_policy: default_act_policy(),
            flat_act_policy: default_act_policy(),
            batch_norm: true,
            optimizer: default_optimizer(),
            learning_rate: default_learning_rate(),
        }
    }
}

/// Epoch loop, checkpoint and log settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Summaries are written every `summary_step` global steps.
    #[serde(default = "default_summary_step")]
    pub summary_step: usize,
    #[serde(default = "default_max_to_keep")]
    pub save_max_to_keep: usize,
    #[serde(default = "default_ckpt_dir")]
    pub ckpt_dir: PathBuf,
    #[serde(default = "default_summaries_dir")]
    pub summaries_dir: PathBuf,
    /// Stop after this many epochs without improvement. Disabled when unset.
    #[serde(default)]
    pub early_stopping_patience: Option<usize>,
    #[serde(default)]
    pub min_delta: f64,
    #[serde(default = "default_true")]
    pub stop_on_non_finite: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            summary_step: default_summary_step(),
            save_max_to_keep: default_max_to_keep(),
            ckpt_dir: default_ckpt_dir(),
            summaries_dir: default_summaries_dir(),
            early_stopping_patience: None,
            min_delta: 0.0,
            stop_on_non_finite: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_fold_dir() -> PathBuf {
    PathBuf::from("fold")
}

fn default_batch_size() -> usize {
    32
}

fn default_min_list() -> Vec<f64> {
    vec![2.0, -12.0, 50.0, 850.0]
}

fn default_max_list() -> Vec<f64> {
    vec![9.0, 68.0, 206.0, 1040.0]
}

fn default_input_norm_scale() -> f64 {
    10.0
}

fn default_model_name() -> String {
    "model".to_string()
}

fn default_act_policy() -> String {
    "relu".to_string()
}

fn default_optimizer() -> String {
    "AdamOptimizer".to_string()
}

fn default_learning_rate() -> f64 {
    1e-4
}

fn default_epochs() -> usize {
    100
}

fn default_summary_step() -> usize {
    100
}

fn default_max_to_keep() -> usize {
    5
}

fn default_ckpt_dir() -> PathBuf {
    PathBuf::from("ckpt")
}

fn default_summaries_dir() -> PathBuf {
    PathBuf::from("summaries")
}

impl TrainConfig {
    /// Rejects settings the runner cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.data.batch_size == 0 {
            return Err(TrackRegError::config("data.batch_size must be > 0"));
        }
        if self.data.norm.input_norm
            && !(self.data.norm.input_norm_scale.is_finite()
                && self.data.norm.input_norm_scale != 0.0)
        {
            return Err(TrackRegError::config(
                "data.norm.input_norm_scale must be finite and non-zero",
            ));
        }
        self.data
            .norm
            .normalizer()
            .map_err(|e| TrackRegError::config(format!("data.norm: {e}")))?;

        let name = &self.model.model_name;
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(TrackRegError::config(format!(
                "model.model_name '{name}' must be a non-empty file name"
            )));
        }
        if !(self.model.learning_rate.is_finite() && self.model.learning_rate > 0.0) {
            return Err(TrackRegError::config(
                "model.learning_rate must be finite and > 0",
            ));
        }

        if self.training.summary_step == 0 {
            return Err(TrackRegError::config("training.summary_step must be > 0"));
        }
        if self.training.save_max_to_keep == 0 {
            return Err(TrackRegError::config(
                "training.save_max_to_keep must be > 0",
            ));
        }
        if !self.training.min_delta.is_finite() || self.training.min_delta < 0.0 {
            return Err(TrackRegError::config(
                "training.min_delta must be finite and >= 0",
            ));
        }
        Ok(())
    }
}

/// Command-line overrides. Only fields that are set take part in the merge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    pub data: DataOverrides,
    pub model: ModelOverrides,
    pub training: TrainingOverrides,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DataOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_scene: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_type: Option<NetworkKind>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epochs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ckpt_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summaries_dir: Option<PathBuf>,
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `TRACKREG_`)
/// 3. `config_file` if given, otherwise `<workspace>/trackreg.toml`
/// 4. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<TrainConfig> {
    let mut figment = Figment::from(Serialized::defaults(TrainConfig::default()));

    match (config_file, workspace) {
        (Some(file), _) => {
            if !file.exists() {
                return Err(TrackRegError::not_found(format!(
                    "config file {}",
                    file.display()
                )));
            }
            figment = figment.merge(Toml::file(file));
        }
        (None, Some(ws)) => {
            let ws_config = ws.join(CONFIG_FILE_NAME);
            if ws_config.exists() {
                figment = figment.merge(Toml::file(ws_config));
            }
        }
        (None, None) => {}
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: TrainConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

/// Write the built-in defaults as TOML. Refuses to overwrite an existing file.
pub fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(TrackRegError::invalid_input(format!(
            "{} already exists",
            path.display()
        )));
    }
    let body = toml::to_string_pretty(&TrainConfig::default())
        .map_err(|e| TrackRegError::config(e.to_string()))?;
    crate::persistence::atomic_write(path, body.as_bytes())?;
    Ok(())
}
