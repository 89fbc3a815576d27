use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu};
use burn::tensor::{backend::Backend, Tensor};

use crate::dataset::RadarBatch;
use crate::model::swin::{SwinEncoder, SwinEncoderConfig};
use crate::model::track::{TrackEncoder, TrackEncoderConfig};

#[derive(Config, Debug)]
pub struct FusionModelConfig {
    pub track: TrackEncoderConfig,
    pub image: SwinEncoderConfig,
    pub num_classes: usize,
    /// Adds the recognition-latency regression head.
    #[config(default = false)]
    pub time_head: bool,
    #[config(default = 64)]
    pub time_hidden: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl FusionModelConfig {
    pub fn fused_width(&self) -> usize {
        self.track.d_model + self.image.num_features()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> FusionModel<B> {
        let width = self.fused_width();
        FusionModel {
            track: self.track.init(device),
            image: self.image.init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            classifier: LinearConfig::new(width, self.num_classes).init(device),
            time_head: self.time_head.then(|| TimeHead {
                hidden: LinearConfig::new(width, self.time_hidden).init(device),
                activation: Relu::new(),
                output: LinearConfig::new(self.time_hidden, 1).init(device),
            }),
        }
    }
}

/// Track and range-Doppler encoders joined by a linear classifier.
#[derive(Module, Debug)]
pub struct FusionModel<B: Backend> {
    track: TrackEncoder<B>,
    image: SwinEncoder<B>,
    dropout: Dropout,
    classifier: Linear<B>,
    time_head: Option<TimeHead<B>>,
}

#[derive(Module, Debug)]
pub struct TimeHead<B: Backend> {
    hidden: Linear<B>,
    activation: Relu,
    output: Linear<B>,
}

#[derive(Debug, Clone)]
pub struct FusionOutput<B: Backend> {
    /// `[batch, num_classes]`
    pub logits: Tensor<B, 2>,
    /// `[batch]`, present when the model carries a time head.
    pub time: Option<Tensor<B, 1>>,
}

impl<B: Backend> FusionModel<B> {
    pub fn has_time_head(&self) -> bool {
        self.time_head.is_some()
    }

    pub fn forward(
        &self,
        tracks: Tensor<B, 3>,
        track_mask: Tensor<B, 2>,
        images: Tensor<B, 4>,
        image_mask: Tensor<B, 2>,
    ) -> FusionOutput<B> {
        let track = self.track.forward(tracks, track_mask);
        let image = self.image.forward(images, image_mask);
        let fused = self.dropout.forward(Tensor::cat(vec![track, image], 1));

        let time = self.time_head.as_ref().map(|head| {
            let hidden = head.activation.forward(head.hidden.forward(fused.clone()));
            head.output.forward(hidden).squeeze::<1>(1)
        });
        FusionOutput {
            logits: self.classifier.forward(fused),
            time,
        }
    }

    pub fn forward_batch(&self, batch: &RadarBatch<B>) -> FusionOutput<B> {
        self.forward(
            batch.tracks.clone(),
            batch.track_mask.clone(),
            batch.images.clone(),
            batch.image_mask.clone(),
        )
    }
}
