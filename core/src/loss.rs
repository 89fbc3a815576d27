//! Classification and latency-regression objectives.

use burn::tensor::{activation::log_softmax, backend::Backend, ElementConversion, Int, Tensor, TensorData};

use crate::model::FusionOutput;

/// Focal loss over class logits: `mean(-alpha_y * (1 - p_y)^gamma * log p_y)`.
#[derive(Debug, Clone)]
pub struct FocalLoss {
    gamma: f64,
    alpha: Option<Vec<f32>>,
}

impl Default for FocalLoss {
    fn default() -> Self {
        Self::new(2.0)
    }
}

impl FocalLoss {
    pub fn new(gamma: f64) -> Self {
        Self { gamma, alpha: None }
    }

    /// Per-class weights indexed by class id.
    pub fn with_alpha(mut self, alpha: Vec<f32>) -> Self {
        self.alpha = Some(alpha);
        self
    }

    pub fn forward<B: Backend>(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let [batch, classes] = logits.dims();
        let device = logits.device();
        let log_pt = log_softmax(logits, 1)
            .gather(1, targets.clone().reshape([batch, 1]))
            .reshape([batch]);
        let modulator = log_pt
            .clone()
            .exp()
            .neg()
            .add_scalar(1.0)
            .clamp_min(0.0)
            .powf_scalar(self.gamma);
        let mut loss = modulator * log_pt.neg();

        if let Some(alpha) = &self.alpha {
            let table = Tensor::<B, 1>::from_data(TensorData::new(alpha.clone(), [classes]), &device);
            loss = loss * table.select(0, targets);
        }
        loss.mean()
    }
}

pub fn mse<B: Backend>(prediction: Tensor<B, 1>, target: Tensor<B, 1>) -> Tensor<B, 1> {
    (prediction - target).powf_scalar(2.0).mean()
}

/// Loss components of one batch; every tensor is a single-element scalar.
#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    pub total: Tensor<B, 1>,
    pub classification: Tensor<B, 1>,
    pub regression: Option<Tensor<B, 1>>,
}

/// Focal classification loss plus the weighted latency MSE when a time
/// prediction is present.
#[derive(Debug, Clone)]
pub struct CombinedLoss {
    pub focal: FocalLoss,
    pub time_weight: f64,
}

impl CombinedLoss {
    pub fn new(focal: FocalLoss, time_weight: f64) -> Self {
        Self { focal, time_weight }
    }

    pub fn forward<B: Backend>(
        &self,
        output: &FusionOutput<B>,
        labels: Tensor<B, 1, Int>,
        time_targets: Tensor<B, 1>,
    ) -> LossOutput<B> {
        let classification = self.focal.forward(output.logits.clone(), labels);
        match &output.time {
            Some(time) => {
                let regression = mse(time.clone(), time_targets);
                LossOutput {
                    total: classification.clone() + regression.clone().mul_scalar(self.time_weight),
                    classification,
                    regression: Some(regression),
                }
            }
            None => LossOutput {
                total: classification.clone(),
                classification,
                regression: None,
            },
        }
    }
}

/// Number of rows whose arg-max logit equals the label.
pub fn correct_predictions<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> usize {
    let [batch, _] = logits.dims();
    let hits = logits
        .argmax(1)
        .reshape([batch])
        .equal(labels)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();
    hits.max(0) as usize
}

pub fn scalar<B: Backend>(value: Tensor<B, 1>) -> f64 {
    value.into_scalar().elem::<f64>()
}
