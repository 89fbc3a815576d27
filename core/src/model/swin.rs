//! Swin-style encoder for sequences of single-channel range-Doppler frames.
//!
//! Each frame is patch-embedded and passed through stages of windowed
//! self-attention. Odd blocks inside a stage shift the window grid by half a
//! window (cyclic roll plus an attention mask that keeps wrapped regions
//! apart). Stages are joined by 2x2 patch merging that doubles the channel
//! width. Frame embeddings are averaged over the valid frames of each sample.

use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{
    Dropout, DropoutConfig, Gelu, Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig,
};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use crate::model::attention::{masked_mean, MultiHeadSelfAttention};

const MASKED_SCORE: f32 = -100.0;

#[derive(Config, Debug)]
pub struct SwinEncoderConfig {
    pub img_height: usize,
    pub img_width: usize,
    pub patch_size: usize,
    pub embed_dim: usize,
    pub depths: Vec<usize>,
    pub num_heads: Vec<usize>,
    pub window_size: usize,
    #[config(default = 4.0)]
    pub mlp_ratio: f64,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl SwinEncoderConfig {
    /// Channel width after the last stage.
    pub fn num_features(&self) -> usize {
        self.embed_dim << self.depths.len().saturating_sub(1)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.depths.is_empty() {
            return Err("at least one stage is required".into());
        }
        if self.depths.len() != self.num_heads.len() {
            return Err(format!(
                "depths has {} stages but num_heads has {}",
                self.depths.len(),
                self.num_heads.len()
            ));
        }
        if self.patch_size == 0 || self.window_size == 0 || self.embed_dim == 0 {
            return Err("patch_size, window_size and embed_dim must be positive".into());
        }
        if self.depths.contains(&0) || self.num_heads.contains(&0) {
            return Err("stage depths and head counts must be positive".into());
        }
        let stride = self.patch_size * self.window_size * (1 << (self.depths.len() - 1));
        if self.img_height % stride != 0 || self.img_width % stride != 0 {
            return Err(format!(
                "image {}x{} is not divisible by patch_size * window_size * 2^(stages-1) = {stride}",
                self.img_height, self.img_width
            ));
        }
        for (stage, heads) in self.num_heads.iter().enumerate() {
            let dim = self.embed_dim << stage;
            if dim % heads != 0 {
                return Err(format!("stage {stage}: width {dim} not divisible by {heads} heads"));
            }
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(format!("dropout {} outside [0, 1)", self.dropout));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SwinEncoder<B> {
        let mut height = self.img_height / self.patch_size;
        let mut width = self.img_width / self.patch_size;
        let last = self.depths.len().saturating_sub(1);

        let mut stages = Vec::with_capacity(self.depths.len());
        for (stage, (&depth, &heads)) in self.depths.iter().zip(&self.num_heads).enumerate() {
            let dim = self.embed_dim << stage;
            let window = self.window_size.min(height).min(width);
            let blocks = (0..depth)
                .map(|index| {
                    let shift = if index % 2 == 1 && height.min(width) > window {
                        window / 2
                    } else {
                        0
                    };
                    SwinBlock {
                        norm_attn: LayerNormConfig::new(dim).init(device),
                        attention: WindowAttention::new(dim, heads, window, self.dropout, device),
                        norm_mlp: LayerNormConfig::new(dim).init(device),
                        fc1: LinearConfig::new(dim, (dim as f64 * self.mlp_ratio) as usize)
                            .init(device),
                        fc2: LinearConfig::new((dim as f64 * self.mlp_ratio) as usize, dim)
                            .init(device),
                        activation: Gelu::new(),
                        dropout: DropoutConfig::new(self.dropout).init(),
                        window,
                        shift,
                        height,
                        width,
                    }
                })
                .collect();

            let merge = (stage < last).then(|| PatchMerging {
                norm: LayerNormConfig::new(4 * dim).init(device),
                reduction: LinearConfig::new(4 * dim, 2 * dim)
                    .with_bias(false)
                    .init(device),
                height,
                width,
            });
            stages.push(SwinStage { blocks, merge });
            if stage < last {
                height /= 2;
                width /= 2;
            }
        }

        SwinEncoder {
            patch_embed: Conv2dConfig::new([1, self.embed_dim], [self.patch_size, self.patch_size])
                .with_stride([self.patch_size, self.patch_size])
                .init(device),
            patch_norm: LayerNormConfig::new(self.embed_dim).init(device),
            stages,
            norm: LayerNormConfig::new(self.num_features()).init(device),
            num_features: self.num_features(),
        }
    }
}

#[derive(Module, Debug)]
pub struct SwinEncoder<B: Backend> {
    patch_embed: Conv2d<B>,
    patch_norm: LayerNorm<B>,
    stages: Vec<SwinStage<B>>,
    norm: LayerNorm<B>,
    num_features: usize,
}

impl<B: Backend> SwinEncoder<B> {
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// `images` is `[batch, frames, height, width]`, `mask` is `[batch, frames]`.
    /// Returns `[batch, num_features]`.
    pub fn forward(&self, images: Tensor<B, 4>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, frames, height, width] = images.dims();
        let x = self
            .patch_embed
            .forward(images.reshape([batch * frames, 1, height, width]));
        let [n, channels, rows, cols] = x.dims();
        let mut x = self
            .patch_norm
            .forward(x.reshape([n, channels, rows * cols]).swap_dims(1, 2));

        for stage in &self.stages {
            x = stage.forward(x);
        }

        let per_frame = self.norm.forward(x).mean_dim(1).squeeze::<2>(1);
        masked_mean(per_frame.reshape([batch, frames, self.num_features]), mask)
    }
}

#[derive(Module, Debug)]
pub struct SwinStage<B: Backend> {
    blocks: Vec<SwinBlock<B>>,
    merge: Option<PatchMerging<B>>,
}

impl<B: Backend> SwinStage<B> {
    fn forward(&self, mut x: Tensor<B, 3>) -> Tensor<B, 3> {
        for block in &self.blocks {
            x = block.forward(x);
        }
        match &self.merge {
            Some(merge) => merge.forward(x),
            None => x,
        }
    }
}

#[derive(Module, Debug)]
pub struct SwinBlock<B: Backend> {
    norm_attn: LayerNorm<B>,
    attention: WindowAttention<B>,
    norm_mlp: LayerNorm<B>,
    fc1: Linear<B>,
    fc2: Linear<B>,
    activation: Gelu,
    dropout: Dropout,
    window: usize,
    shift: usize,
    height: usize,
    width: usize,
}

impl<B: Backend> SwinBlock<B> {
    /// `x` is `[n, height * width, dim]`.
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [n, tokens, dim] = x.dims();
        let device = x.device();
        let shift = self.shift as isize;

        let grid = self.norm_attn.forward(x.clone()).reshape([n, self.height, self.width, dim]);
        let grid = if shift > 0 {
            roll(roll(grid, -shift, 1), -shift, 2)
        } else {
            grid
        };

        let windows = window_partition(grid, self.window);
        let mask = (shift > 0).then(|| {
            let per_window = shift_mask(self.height, self.width, self.window, self.shift);
            let count = per_window.len() / (self.window.pow(4));
            let data: Vec<f32> = per_window.iter().copied().cycle().take(per_window.len() * n).collect();
            let area = self.window * self.window;
            Tensor::<B, 4>::from_data(TensorData::new(data, [n * count, 1, area, area]), &device)
        });
        let attended = self.attention.forward(windows, mask);

        let grid = window_reverse(attended, self.window, n, self.height, self.width);
        let grid = if shift > 0 {
            roll(roll(grid, shift, 1), shift, 2)
        } else {
            grid
        };
        let x = x + self.dropout.forward(grid.reshape([n, tokens, dim]));

        let hidden = self.activation.forward(self.fc1.forward(self.norm_mlp.forward(x.clone())));
        let mlp = self.fc2.forward(self.dropout.forward(hidden));
        x + self.dropout.forward(mlp)
    }
}

#[derive(Module, Debug)]
pub struct WindowAttention<B: Backend> {
    attention: MultiHeadSelfAttention<B>,
    relative_bias: Param<Tensor<B, 2>>,
    window: usize,
    num_heads: usize,
}

impl<B: Backend> WindowAttention<B> {
    fn new(dim: usize, num_heads: usize, window: usize, dropout: f64, device: &B::Device) -> Self {
        let span = 2 * window - 1;
        Self {
            attention: MultiHeadSelfAttention::new(dim, num_heads, dropout, device),
            relative_bias: Initializer::Normal {
                mean: 0.0,
                std: 0.02,
            }
            .init([span * span, num_heads], device),
            window,
            num_heads,
        }
    }

    /// `windows` is `[n * windows, window^2, dim]`; `mask` is `[n * windows, 1, window^2, window^2]`.
    fn forward(&self, windows: Tensor<B, 3>, mask: Option<Tensor<B, 4>>) -> Tensor<B, 3> {
        let area = self.window * self.window;
        let index = Tensor::<B, 1, Int>::from_data(
            TensorData::new(relative_position_index(self.window), [area * area]),
            &windows.device(),
        );
        let bias = self
            .relative_bias
            .val()
            .select(0, index)
            .reshape([area, area, self.num_heads])
            .permute([2, 0, 1])
            .unsqueeze::<4>();
        let bias = match mask {
            Some(mask) => bias + mask,
            None => bias,
        };
        self.attention.forward(windows, Some(bias), None)
    }
}

#[derive(Module, Debug)]
pub struct PatchMerging<B: Backend> {
    norm: LayerNorm<B>,
    reduction: Linear<B>,
    height: usize,
    width: usize,
}

impl<B: Backend> PatchMerging<B> {
    /// `[n, h * w, c]` to `[n, (h/2) * (w/2), 2c]`.
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [n, _, channels] = x.dims();
        let (rows, cols) = (self.height / 2, self.width / 2);
        let merged = x
            .reshape([n, rows, 2, cols, 2, channels])
            .permute([0, 1, 3, 4, 2, 5])
            .reshape([n, rows * cols, 4 * channels]);
        self.reduction.forward(self.norm.forward(merged))
    }
}

/// Cyclic shift along `dim`, matching `torch.roll`.
fn roll<B: Backend>(x: Tensor<B, 4>, shift: isize, dim: usize) -> Tensor<B, 4> {
    let size = x.dims()[dim];
    let shift = shift.rem_euclid(size as isize) as usize;
    if shift == 0 {
        return x;
    }
    let tail = x.clone().narrow(dim, size - shift, shift);
    let head = x.narrow(dim, 0, size - shift);
    Tensor::cat(vec![tail, head], dim)
}

/// `[n, h, w, c]` to `[n * windows, window^2, c]`, windows in row-major order.
fn window_partition<B: Backend>(x: Tensor<B, 4>, window: usize) -> Tensor<B, 3> {
    let [n, height, width, channels] = x.dims();
    let (rows, cols) = (height / window, width / window);
    x.reshape([n, rows, window, cols, window, channels])
        .swap_dims(2, 3)
        .reshape([n * rows * cols, window * window, channels])
}

fn window_reverse<B: Backend>(
    windows: Tensor<B, 3>,
    window: usize,
    n: usize,
    height: usize,
    width: usize,
) -> Tensor<B, 4> {
    let [_, _, channels] = windows.dims();
    let (rows, cols) = (height / window, width / window);
    windows
        .reshape([n, rows, cols, window, window, channels])
        .swap_dims(2, 3)
        .reshape([n, height, width, channels])
}

/// Index into the `(2w-1)^2` bias table for every query/key pair of a window.
pub(crate) fn relative_position_index(window: usize) -> Vec<i64> {
    let w = window as i64;
    let span = 2 * w - 1;
    let coords: Vec<(i64, i64)> = (0..w).flat_map(|y| (0..w).map(move |x| (y, x))).collect();
    coords
        .iter()
        .flat_map(|&(y1, x1)| {
            coords
                .iter()
                .map(move |&(y2, x2)| (y1 - y2 + w - 1) * span + (x1 - x2 + w - 1))
        })
        .collect()
}

/// Additive mask `[windows, window^2, window^2]` separating regions that the
/// cyclic shift brought into the same window.
pub(crate) fn shift_mask(height: usize, width: usize, window: usize, shift: usize) -> Vec<f32> {
    let region = |coord: usize, size: usize| {
        if coord < size - window {
            0
        } else if coord < size - shift {
            1
        } else {
            2
        }
    };

    let area = window * window;
    let mut mask = Vec::with_capacity((height / window) * (width / window) * area * area);
    for wy in 0..height / window {
        for wx in 0..width / window {
            let ids: Vec<usize> = (0..area)
                .map(|i| {
                    let y = wy * window + i / window;
                    let x = wx * window + i % window;
                    region(y, height) * 3 + region(x, width)
                })
                .collect();
            for a in &ids {
                for b in &ids {
                    mask.push(if a == b { 0.0 } else { MASKED_SCORE });
                }
            }
        }
    }
    mask
}
