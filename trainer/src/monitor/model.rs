use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    #[default]
    Idle,
    Training,
    EpochDone,
    Finished,
}

/// Latest progress of the running experiment, served as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingStatus {
    pub phase: TrainingPhase,
    pub epoch: usize,
    pub total_epochs: usize,
    pub step: usize,
    pub train_loss: Option<f64>,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
    pub learning_rate: f64,
}
