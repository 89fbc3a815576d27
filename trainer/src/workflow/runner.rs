use crate::monitor::bridge::StatusBridge;
use crate::monitor::model::{TrainingPhase, TrainingStatus};
use crate::workflow::config::ExperimentConfig;
use anyhow::{anyhow, bail, Context};
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::{AutodiffBackend, Backend};
use log::{info, warn};
use rtrcore::dataset::{
    collate, CausalRdTrackDataset, DataLoader, EpisodeDataset, RdTrackDataset, Sample,
};
use rtrcore::loss::{correct_predictions, scalar, CombinedLoss, FocalLoss};
use rtrcore::model::FusionModel;
use rtrcore::records::{discover_batch_files, split_train_val};
use rtrcore::schedule::{PlateauMode, PlateauScheduler};
use rtrcore::telemetry::{MetricsRecorder, MetricsSnapshot};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub const BEST_CHECKPOINT: &str = "best_model";
pub const LAST_CHECKPOINT: &str = "last_model";

#[derive(Debug, Clone, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub train: MetricsSnapshot,
    pub val: Option<MetricsSnapshot>,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub epochs: Vec<EpochReport>,
    pub best_epoch: Option<usize>,
    pub best_val_accuracy: f64,
    pub train_episodes: usize,
    pub val_episodes: usize,
}

/// Drives one experiment: data split, epochs, validation, scheduling and checkpoints.
pub struct Runner<B: AutodiffBackend> {
    config: ExperimentConfig,
    device: B::Device,
    status: Option<Arc<StatusBridge>>,
}

impl<B: AutodiffBackend> Runner<B> {
    pub fn new(config: ExperimentConfig, device: B::Device) -> Self {
        Self {
            config,
            device,
            status: None,
        }
    }

    pub fn with_status(mut self, status: Arc<StatusBridge>) -> Self {
        self.status = Some(status);
        self
    }

    /// Discovers episodes, splits them per class and wraps both splits in loaders.
    /// Training uses the causal adapter when `data.causal` is set; validation
    /// always sees whole episodes.
    pub fn build_loaders(&self) -> anyhow::Result<(DataLoader, DataLoader)> {
        let data = &self.config.data;
        let batch_files = discover_batch_files(&data.data_root)
            .with_context(|| format!("discovering episodes under {}", data.data_root.display()))?;
        let (train_files, val_files) = split_train_val(
            batch_files,
            data.num_classes,
            data.val_ratio,
            data.shuffle,
            data.seed,
        );
        if train_files.is_empty() {
            bail!("no training episodes left after the train/val split");
        }

        let loader = self.config.episode_loader();
        let lengths = self.config.lengths();
        let train_set: Arc<dyn EpisodeDataset> = if data.causal {
            Arc::new(CausalRdTrackDataset::new(
                train_files,
                loader.clone(),
                lengths,
                data.causal_seed,
            ))
        } else {
            Arc::new(RdTrackDataset::new(train_files, loader.clone(), lengths))
        };
        let val_set: Arc<dyn EpisodeDataset> =
            Arc::new(RdTrackDataset::new(val_files, loader, lengths));
        info!(
            "train split: {} episodes ({}), val split: {} episodes",
            train_set.len(),
            train_set.name(),
            val_set.len()
        );

        let batch_size = self.config.train.batch_size;
        let train = DataLoader::new(train_set, batch_size, data.shuffle, data.seed, data.num_workers)
            .context("building training loader")?;
        let val = DataLoader::new(val_set, batch_size, false, data.seed, data.num_workers)
            .context("building validation loader")?;
        Ok((train, val))
    }

    pub fn execute(&self) -> anyhow::Result<RunSummary> {
        let (train_loader, val_loader) = self.build_loaders()?;
        self.execute_with(&train_loader, &val_loader)
    }

    pub fn execute_with(
        &self,
        train_loader: &DataLoader,
        val_loader: &DataLoader,
    ) -> anyhow::Result<RunSummary> {
        let train = &self.config.train;
        let checkpoint_dir = &train.checkpoint_dir;
        fs::create_dir_all(checkpoint_dir)
            .with_context(|| format!("creating checkpoint dir {}", checkpoint_dir.display()))?;
        let snapshot = serde_yaml::to_string(&self.config).context("serialising config")?;
        fs::write(checkpoint_dir.join("config.yaml"), snapshot)
            .context("writing config snapshot")?;

        let mut model: FusionModel<B> = self.config.model_config().init(&self.device);
        let mut optim = AdamWConfig::new()
            .with_weight_decay(train.weight_decay as f32)
            .init::<B, FusionModel<B>>();
        let mut focal = FocalLoss::new(train.focal_gamma);
        if let Some(alpha) = &train.focal_alpha {
            focal = focal.with_alpha(alpha.clone());
        }
        let criterion = CombinedLoss::new(focal, train.time_loss_weight);
        let mut scheduler = PlateauScheduler::new(train.scheduler.clone(), train.learning_rate);
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();

        let metrics = MetricsRecorder::new();
        let mut reports = Vec::with_capacity(train.epochs);
        let mut best: Option<(usize, f64)> = None;

        for epoch in 0..train.epochs {
            let lr = scheduler.lr();
            metrics.reset();
            for (step, batch) in train_loader.epoch(epoch).enumerate() {
                let samples = batch.with_context(|| {
                    format!("loading training batch {} of epoch {}", step, epoch + 1)
                })?;
                metrics.record_skipped_frames(skipped_frames(&samples));
                let batch = collate::<B>(&samples, &self.device)?;

                let output = model.forward_batch(&batch);
                let loss = criterion.forward(&output, batch.labels.clone(), batch.time_targets.clone());
                let correct = correct_predictions(output.logits, batch.labels);
                let total = scalar(loss.total.clone());
                let time_loss = loss.regression.map(scalar);
                metrics.record_batch(samples.len(), total, time_loss, correct);

                let grads = GradientsParams::from_grads(loss.total.backward(), &model);
                model = optim.step(lr, model, grads);

                if (step + 1) % train.log_every == 0 {
                    info!(
                        "epoch {} step {}/{}: loss={:.4} acc={:.3}",
                        epoch + 1,
                        step + 1,
                        train_loader.num_batches(),
                        total,
                        correct as f64 / samples.len() as f64
                    );
                }
                self.publish(TrainingStatus {
                    phase: TrainingPhase::Training,
                    epoch: epoch + 1,
                    total_epochs: train.epochs,
                    step: step + 1,
                    train_loss: Some(total),
                    learning_rate: lr,
                    ..self.last_status()
                });
            }
            let train_summary = metrics.snapshot();

            let val_summary = if val_loader.is_empty() {
                warn!("validation split is empty; scheduling on the training loss");
                None
            } else {
                Some(self.validate(&model.valid(), val_loader, &criterion, epoch)?)
            };

            let monitored = match (train.scheduler.mode, &val_summary) {
                (PlateauMode::Min, Some(val)) => val.mean_loss,
                (PlateauMode::Max, Some(val)) => val.accuracy,
                (PlateauMode::Min, None) => train_summary.mean_loss,
                (PlateauMode::Max, None) => train_summary.accuracy,
            };
            let next_lr = scheduler.step(monitored);

            let accuracy = val_summary.map_or(train_summary.accuracy, |val| val.accuracy);
            if best.map_or(true, |(_, best_acc)| accuracy > best_acc) {
                best = Some((epoch + 1, accuracy));
                save_model(&model, &recorder, &checkpoint_dir.join(BEST_CHECKPOINT))?;
                info!("epoch {}: new best accuracy {:.3}", epoch + 1, accuracy);
            }
            save_model(&model, &recorder, &checkpoint_dir.join(LAST_CHECKPOINT))?;

            info!(
                "epoch {} done: train loss={:.4} acc={:.3} | val loss={} acc={} | lr={:.3e}",
                epoch + 1,
                train_summary.mean_loss,
                train_summary.accuracy,
                val_summary.map_or("-".to_string(), |v| format!("{:.4}", v.mean_loss)),
                val_summary.map_or("-".to_string(), |v| format!("{:.3}", v.accuracy)),
                next_lr
            );
            if train_summary.skipped_frames > 0 {
                info!("epoch {}: {} raw frames skipped", epoch + 1, train_summary.skipped_frames);
            }
            self.publish(TrainingStatus {
                phase: TrainingPhase::EpochDone,
                epoch: epoch + 1,
                total_epochs: train.epochs,
                train_loss: Some(train_summary.mean_loss),
                val_loss: val_summary.map(|v| v.mean_loss),
                val_accuracy: val_summary.map(|v| v.accuracy),
                learning_rate: next_lr,
                ..self.last_status()
            });
            reports.push(EpochReport {
                epoch: epoch + 1,
                train: train_summary,
                val: val_summary,
                learning_rate: lr,
            });
        }

        let summary = RunSummary {
            epochs: reports,
            best_epoch: best.map(|(epoch, _)| epoch),
            best_val_accuracy: best.map_or(0.0, |(_, acc)| acc),
            train_episodes: train_loader.len(),
            val_episodes: val_loader.len(),
        };
        let json = serde_json::to_string_pretty(&summary).context("serialising run summary")?;
        fs::write(checkpoint_dir.join("summary.json"), json).context("writing run summary")?;
        self.publish(TrainingStatus {
            phase: TrainingPhase::Finished,
            ..self.last_status()
        });
        Ok(summary)
    }

    fn validate(
        &self,
        model: &FusionModel<B::InnerBackend>,
        loader: &DataLoader,
        criterion: &CombinedLoss,
        epoch: usize,
    ) -> anyhow::Result<MetricsSnapshot> {
        let metrics = MetricsRecorder::new();
        for (step, batch) in loader.epoch(epoch).enumerate() {
            let samples = batch.with_context(|| {
                format!("loading validation batch {} of epoch {}", step, epoch + 1)
            })?;
            metrics.record_skipped_frames(skipped_frames(&samples));
            let batch = collate::<B::InnerBackend>(&samples, &self.device)?;
            let output = model.forward_batch(&batch);
            let loss = criterion.forward(&output, batch.labels.clone(), batch.time_targets.clone());
            let correct = correct_predictions(output.logits, batch.labels);
            metrics.record_batch(
                samples.len(),
                scalar(loss.total),
                loss.regression.map(scalar),
                correct,
            );
        }
        Ok(metrics.snapshot())
    }

    fn publish(&self, status: TrainingStatus) {
        if let Some(bridge) = &self.status {
            bridge.publish(status);
        }
    }

    fn last_status(&self) -> TrainingStatus {
        self.status
            .as_ref()
            .map(|bridge| bridge.snapshot())
            .unwrap_or_default()
    }
}

fn skipped_frames(samples: &[Sample]) -> usize {
    samples.iter().map(|sample| sample.skipped_frames).sum()
}

fn save_model<B: Backend>(
    model: &FusionModel<B>,
    recorder: &BinFileRecorder<FullPrecisionSettings>,
    path: &Path,
) -> anyhow::Result<()> {
    model
        .clone()
        .save_file(path, recorder)
        .map_err(|err| anyhow!("saving checkpoint {}: {:?}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::profile::{write_data_root, SyntheticProfile};
    use crate::workflow::config::tests::small_config;
    use burn::backend::{Autodiff, NdArray};
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn runner(root: &Path, checkpoints: &Path, causal: bool) -> Runner<TestBackend> {
        let mut config = small_config();
        config.data.data_root = root.to_path_buf();
        config.data.num_classes = 2;
        config.data.causal = causal;
        config.data.causal_seed = Some(3);
        config.train.checkpoint_dir = checkpoints.to_path_buf();
        Runner::new(config, Default::default())
    }

    fn profile() -> SyntheticProfile {
        SyntheticProfile {
            num_classes: 2,
            episodes_per_class: 2,
            frames: 3,
            steps: 5,
            ..SyntheticProfile::default()
        }
    }

    #[test]
    fn loaders_split_per_class() {
        let data = TempDir::new().unwrap();
        let ckpt = TempDir::new().unwrap();
        write_data_root(&profile(), data.path()).unwrap();
        let (train, val) = runner(data.path(), ckpt.path(), false).build_loaders().unwrap();
        assert_eq!(train.len(), 2);
        assert_eq!(val.len(), 2);
    }

    #[test]
    fn runner_trains_and_writes_checkpoints() {
        let data = TempDir::new().unwrap();
        let ckpt = TempDir::new().unwrap();
        write_data_root(&profile(), data.path()).unwrap();

        let status = Arc::new(StatusBridge::new());
        let summary = runner(data.path(), ckpt.path(), true)
            .with_status(status.clone())
            .execute()
            .unwrap();

        assert_eq!(summary.epochs.len(), 2);
        for report in &summary.epochs {
            assert!(report.train.mean_loss.is_finite());
            assert!(report.train.mean_loss >= 0.0);
            assert_eq!(report.train.samples, 2);
            assert_eq!(report.val.map(|v| v.samples), Some(2));
        }
        assert!(summary.best_epoch.is_some());
        assert!(ckpt.path().join(format!("{BEST_CHECKPOINT}.bin")).exists());
        assert!(ckpt.path().join(format!("{LAST_CHECKPOINT}.bin")).exists());
        assert!(ckpt.path().join("summary.json").exists());
        assert!(ckpt.path().join("config.yaml").exists());

        let last = status.snapshot();
        assert_eq!(last.phase, TrainingPhase::Finished);
        assert_eq!(last.epoch, 2);
    }

    #[test]
    fn missing_data_root_is_reported() {
        let data = TempDir::new().unwrap();
        let ckpt = TempDir::new().unwrap();
        let err = runner(&data.path().join("absent"), ckpt.path(), false)
            .execute()
            .unwrap_err();
        assert!(format!("{err}").starts_with("discovering episodes"));
    }
}
