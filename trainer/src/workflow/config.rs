use anyhow::{bail, Context};
use rtrcore::dataset::{EpisodeLoader, SequenceLengths};
use rtrcore::model::{FusionModelConfig, SwinEncoderConfig, TrackEncoderConfig};
use rtrcore::prelude::StageConfig;
use rtrcore::records::plots::TIMESTEP_FEATURES;
use rtrcore::schedule::PlateauConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Experiment description read from YAML; read-only once loaded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub rd_model: RdModelSection,
    pub track_model: TrackModelSection,
    pub data: DataSection,
    pub train: TrainSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RdModelSection {
    pub img_height: usize,
    pub img_width: usize,
    pub patch_size: usize,
    pub embed_dim: usize,
    pub depths: Vec<usize>,
    pub num_heads: Vec<usize>,
    pub window_size: usize,
    #[serde(default = "default_mlp_ratio")]
    pub mlp_ratio: f64,
    #[serde(default = "default_dropout")]
    pub dropout: f64,
    pub image_seq_len: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackModelSection {
    pub input_dim: usize,
    pub d_model: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub dim_feedforward: usize,
    #[serde(default = "default_dropout")]
    pub dropout: f64,
    pub track_seq_len: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataSection {
    pub data_root: PathBuf,
    pub num_classes: usize,
    #[serde(default = "default_val_ratio")]
    pub val_ratio: f64,
    #[serde(default = "default_true")]
    pub shuffle: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub num_workers: usize,
    /// Train on random causal prefixes instead of whole episodes.
    #[serde(default)]
    pub causal: bool,
    #[serde(default)]
    pub causal_seed: Option<u64>,
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default)]
    pub processing: StageConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    Classification,
    /// Classification plus recognition-latency regression.
    Multitask,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainSection {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    #[serde(default = "default_task")]
    pub task: TaskMode,
    #[serde(default = "default_time_loss_weight")]
    pub time_loss_weight: f64,
    #[serde(default = "default_focal_gamma")]
    pub focal_gamma: f64,
    #[serde(default)]
    pub focal_alpha: Option<Vec<f32>>,
    #[serde(default)]
    pub scheduler: PlateauConfig,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    #[serde(default = "default_log_every")]
    pub log_every: usize,
}

fn default_mlp_ratio() -> f64 {
    4.0
}

fn default_dropout() -> f64 {
    0.1
}

fn default_val_ratio() -> f64 {
    0.2
}

fn default_true() -> bool {
    true
}

fn default_weight_decay() -> f64 {
    1e-4
}

fn default_task() -> TaskMode {
    TaskMode::Classification
}

fn default_time_loss_weight() -> f64 {
    0.1
}

fn default_focal_gamma() -> f64 {
    2.0
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_log_every() -> usize {
    10
}

impl ExperimentConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading experiment config {}", path_ref.display()))?;
        let config: ExperimentConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing experiment config {}", path_ref.display()))?;
        config
            .validate()
            .with_context(|| format!("validating experiment config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let rd = &self.rd_model;
        let track = &self.track_model;
        let data = &self.data;
        let train = &self.train;

        if rd.image_seq_len == 0 || track.track_seq_len == 0 {
            bail!("image_seq_len and track_seq_len must be positive");
        }
        if track.input_dim != TIMESTEP_FEATURES {
            bail!(
                "track_model.input_dim is {} but each timestep carries {} features",
                track.input_dim,
                TIMESTEP_FEATURES
            );
        }
        if track.d_model == 0 || track.num_heads == 0 || track.num_layers == 0 || track.dim_feedforward == 0 {
            bail!("track_model sizes must be positive");
        }
        if track.d_model % track.num_heads != 0 || (track.d_model / track.num_heads) % 2 != 0 {
            bail!(
                "track_model.d_model {} must split into an even head dimension over {} heads",
                track.d_model,
                track.num_heads
            );
        }
        self.swin_config()
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid rd_model")?;

        if data.num_classes == 0 {
            bail!("data.num_classes must be positive");
        }
        if !(0.0..1.0).contains(&data.val_ratio) {
            bail!("data.val_ratio {} outside [0, 1)", data.val_ratio);
        }

        if train.epochs == 0 || train.batch_size == 0 || train.log_every == 0 {
            bail!("train.epochs, train.batch_size and train.log_every must be positive");
        }
        if !(train.learning_rate > 0.0) {
            bail!("train.learning_rate must be positive");
        }
        if train.time_loss_weight < 0.0 {
            bail!("train.time_loss_weight must be non-negative");
        }
        if let Some(alpha) = &train.focal_alpha {
            if alpha.len() != data.num_classes {
                bail!(
                    "train.focal_alpha has {} entries for {} classes",
                    alpha.len(),
                    data.num_classes
                );
            }
        }
        train
            .scheduler
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid train.scheduler")?;
        Ok(())
    }

    pub fn swin_config(&self) -> SwinEncoderConfig {
        let rd = &self.rd_model;
        SwinEncoderConfig::new(
            rd.img_height,
            rd.img_width,
            rd.patch_size,
            rd.embed_dim,
            rd.depths.clone(),
            rd.num_heads.clone(),
            rd.window_size,
        )
        .with_mlp_ratio(rd.mlp_ratio)
        .with_dropout(rd.dropout)
    }

    pub fn track_config(&self) -> TrackEncoderConfig {
        let track = &self.track_model;
        TrackEncoderConfig::new(
            track.input_dim,
            track.d_model,
            track.num_heads,
            track.num_layers,
            track.dim_feedforward,
        )
        .with_dropout(track.dropout)
    }

    pub fn model_config(&self) -> FusionModelConfig {
        FusionModelConfig::new(self.track_config(), self.swin_config(), self.data.num_classes)
            .with_time_head(self.train.task == TaskMode::Multitask)
    }

    pub fn lengths(&self) -> SequenceLengths {
        SequenceLengths {
            image_seq_len: self.rd_model.image_seq_len,
            track_seq_len: self.track_model.track_seq_len,
        }
    }

    pub fn episode_loader(&self) -> EpisodeLoader {
        EpisodeLoader::new(
            self.data.processing.clone(),
            self.rd_model.img_height,
            self.rd_model.img_width,
            self.data.normalize,
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    pub(crate) const SMALL_YAML: &str = "\
rd_model:
  img_height: 16
  img_width: 16
  patch_size: 2
  embed_dim: 8
  depths: [2, 2]
  num_heads: [2, 4]
  window_size: 4
  dropout: 0.0
  image_seq_len: 4
track_model:
  input_dim: 15
  d_model: 16
  num_heads: 2
  num_layers: 1
  dim_feedforward: 32
  dropout: 0.0
  track_seq_len: 6
data:
  data_root: data
  num_classes: 6
  val_ratio: 0.5
  seed: 7
train:
  epochs: 2
  batch_size: 2
  learning_rate: 0.001
  task: multitask
  log_every: 1
";

    pub(crate) fn small_config() -> ExperimentConfig {
        serde_yaml::from_str(SMALL_YAML).unwrap()
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(SMALL_YAML.as_bytes()).unwrap();
        let path = temp.into_temp_path();
        let cfg = ExperimentConfig::load(&path).unwrap();
        assert_eq!(cfg.train.task, TaskMode::Multitask);
        assert_eq!(cfg.train.time_loss_weight, 0.1);
        assert_eq!(cfg.data.processing.center_bin, 15);
        assert!(cfg.data.shuffle);
        assert!(!cfg.data.causal);
    }

    #[test]
    fn model_config_follows_task_mode() {
        let mut cfg = small_config();
        let model = cfg.model_config();
        assert!(model.time_head);
        assert_eq!(model.fused_width(), 16 + 16);

        cfg.train.task = TaskMode::Classification;
        assert!(!cfg.model_config().time_head);
    }

    #[test]
    fn rejects_wrong_track_width() {
        let mut cfg = small_config();
        cfg.track_model.input_dim = 12;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_image_not_divisible_by_windows() {
        let mut cfg = small_config();
        cfg.rd_model.img_width = 24;
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("rd_model"));
    }

    #[test]
    fn rejects_alpha_of_wrong_length() {
        let mut cfg = small_config();
        cfg.train.focal_alpha = Some(vec![1.0; 3]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_val_ratio_of_one() {
        let mut cfg = small_config();
        cfg.data.val_ratio = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_section_reports_path() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"rd_model: {}\n").unwrap();
        let path = temp.into_temp_path();
        let err = ExperimentConfig::load(&path).unwrap_err();
        assert!(format!("{err}").starts_with("parsing experiment config"));
    }
}
