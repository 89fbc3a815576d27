//! RoFormer-style encoder over per-timestep point/track features.

use burn::config::Config;
use burn::module::Module;
use burn::nn::{
    Dropout, DropoutConfig, Gelu, LayerNorm, LayerNormConfig, Linear, LinearConfig,
};
use burn::tensor::{backend::Backend, Tensor};

use crate::model::attention::{key_padding_bias, masked_mean, MultiHeadSelfAttention};
use crate::model::rope::{Rotary, ROPE_BASE};

#[derive(Config, Debug)]
pub struct TrackEncoderConfig {
    pub input_dim: usize,
    pub d_model: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub dim_feedforward: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl TrackEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TrackEncoder<B> {
        let layers = (0..self.num_layers)
            .map(|_| EncoderLayer {
                norm_attn: LayerNormConfig::new(self.d_model).init(device),
                attention: MultiHeadSelfAttention::new(
                    self.d_model,
                    self.num_heads,
                    self.dropout,
                    device,
                ),
                norm_ff: LayerNormConfig::new(self.d_model).init(device),
                ff_in: LinearConfig::new(self.d_model, self.dim_feedforward).init(device),
                ff_out: LinearConfig::new(self.dim_feedforward, self.d_model).init(device),
                activation: Gelu::new(),
                dropout: DropoutConfig::new(self.dropout).init(),
            })
            .collect();

        TrackEncoder {
            input: LinearConfig::new(self.input_dim, self.d_model).init(device),
            layers,
            norm: LayerNormConfig::new(self.d_model).init(device),
            head_dim: self.d_model / self.num_heads,
        }
    }
}

#[derive(Module, Debug)]
pub struct TrackEncoder<B: Backend> {
    input: Linear<B>,
    layers: Vec<EncoderLayer<B>>,
    norm: LayerNorm<B>,
    head_dim: usize,
}

#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    norm_attn: LayerNorm<B>,
    attention: MultiHeadSelfAttention<B>,
    norm_ff: LayerNorm<B>,
    ff_in: Linear<B>,
    ff_out: Linear<B>,
    activation: Gelu,
    dropout: Dropout,
}

impl<B: Backend> EncoderLayer<B> {
    fn forward(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>, rotary: &Rotary<B>) -> Tensor<B, 3> {
        let attended = self
            .attention
            .forward(self.norm_attn.forward(x.clone()), Some(bias), Some(rotary));
        let x = x + self.dropout.forward(attended);

        let hidden = self.activation.forward(self.ff_in.forward(self.norm_ff.forward(x.clone())));
        let ff = self.ff_out.forward(self.dropout.forward(hidden));
        x + self.dropout.forward(ff)
    }
}

impl<B: Backend> TrackEncoder<B> {
    /// `tracks` is `[batch, steps, input_dim]`, `mask` is `[batch, steps]`
    /// with 1 for real steps. Returns `[batch, d_model]`.
    pub fn forward(&self, tracks: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
        let [_, steps, _] = tracks.dims();
        let device = tracks.device();
        let rotary = Rotary::new(steps, self.head_dim, ROPE_BASE, &device);
        let bias = key_padding_bias(mask.clone());

        let mut x = self.input.forward(tracks);
        for layer in &self.layers {
            x = layer.forward(x, bias.clone(), &rotary);
        }
        masked_mean(self.norm.forward(x), mask)
    }
}
