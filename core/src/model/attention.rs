use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::{activation::softmax, backend::Backend, Tensor};

use crate::model::rope::Rotary;

/// `[batch, tokens, heads * head_dim]` to `[batch, heads, tokens, head_dim]`.
pub(crate) fn split_heads<B: Backend>(x: Tensor<B, 3>, heads: usize) -> Tensor<B, 4> {
    let [batch, tokens, dim] = x.dims();
    x.reshape([batch, tokens, heads, dim / heads]).swap_dims(1, 2)
}

pub(crate) fn merge_heads<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 3> {
    let [batch, heads, tokens, head_dim] = x.dims();
    x.swap_dims(1, 2).reshape([batch, tokens, heads * head_dim])
}

/// Additive attention bias masking padded keys: `[batch, 1, 1, tokens]`,
/// 0 for real tokens and a large negative value for padding.
pub(crate) fn key_padding_bias<B: Backend>(mask: Tensor<B, 2>) -> Tensor<B, 4> {
    let [batch, tokens] = mask.dims();
    mask.sub_scalar(1.0)
        .mul_scalar(1e9)
        .reshape([batch, 1, 1, tokens])
}

/// Mean over the token axis of `[batch, tokens, dim]`, weighted by a `[batch, tokens]` mask.
pub(crate) fn masked_mean<B: Backend>(x: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
    let weights = mask.unsqueeze_dim::<3>(2);
    let summed = (x * weights.clone()).sum_dim(1).squeeze::<2>(1);
    let count = weights.sum_dim(1).squeeze::<2>(1).clamp_min(1.0);
    summed / count
}

#[derive(Module, Debug)]
pub struct MultiHeadSelfAttention<B: Backend> {
    qkv: Linear<B>,
    proj: Linear<B>,
    dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
}

impl<B: Backend> MultiHeadSelfAttention<B> {
    pub fn new(d_model: usize, num_heads: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            qkv: LinearConfig::new(d_model, 3 * d_model).init(device),
            proj: LinearConfig::new(d_model, d_model).init(device),
            dropout: DropoutConfig::new(dropout).init(),
            num_heads,
            head_dim: d_model / num_heads,
        }
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// `x` is `[batch, tokens, d_model]`. `bias` must broadcast to
    /// `[batch, heads, tokens, tokens]` and is added to the scaled scores.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        bias: Option<Tensor<B, 4>>,
        rotary: Option<&Rotary<B>>,
    ) -> Tensor<B, 3> {
        let [batch, tokens, d_model] = x.dims();
        let qkv = self.qkv.forward(x);
        let q = qkv.clone().slice([0..batch, 0..tokens, 0..d_model]);
        let k = qkv
            .clone()
            .slice([0..batch, 0..tokens, d_model..2 * d_model]);
        let v = qkv.slice([0..batch, 0..tokens, 2 * d_model..3 * d_model]);

        let mut q = split_heads(q, self.num_heads);
        let mut k = split_heads(k, self.num_heads);
        let v = split_heads(v, self.num_heads);
        if let Some(rotary) = rotary {
            q = rotary.apply(q);
            k = rotary.apply(k);
        }

        let scale = (self.head_dim as f64).sqrt();
        let mut scores = q.matmul(k.swap_dims(2, 3)).div_scalar(scale);
        if let Some(bias) = bias {
            scores = scores + bias;
        }
        let weights = self.dropout.forward(softmax(scores, 3));
        let context = merge_heads(weights.matmul(v));
        self.proj.forward(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    #[test]
    fn split_and_merge_heads_round_trip() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::random(
            [2, 5, 8],
            burn::tensor::Distribution::Default,
            &device,
        );
        let split = split_heads(x.clone(), 4);
        assert_eq!(split.dims(), [2, 4, 5, 2]);
        merge_heads(split).into_data().assert_eq(&x.into_data(), true);
    }

    #[test]
    fn masked_mean_ignores_padding() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![1.0f32, 1.0, 3.0, 3.0, 100.0, 100.0], [1, 3, 2]),
            &device,
        );
        let mask =
            Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![1.0f32, 1.0, 0.0], [1, 3]), &device);
        let mean = masked_mean(x, mask).into_data().to_vec::<f32>().unwrap();
        assert_eq!(mean, vec![2.0, 2.0]);
    }

    #[test]
    fn padded_keys_receive_no_attention() {
        let device = Default::default();
        let attention = MultiHeadSelfAttention::<TestBackend>::new(8, 2, 0.0, &device);
        let x = Tensor::<TestBackend, 3>::random(
            [1, 4, 8],
            burn::tensor::Distribution::Default,
            &device,
        );
        let mask =
            Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![1.0f32, 1.0, 0.0, 0.0], [1, 4]), &device);

        let reference = attention.forward(x.clone(), Some(key_padding_bias(mask.clone())), None);
        // changing the padded tokens must not move the real ones
        let perturbed = x.clone().slice([0..1, 0..2, 0..8]);
        let noise = Tensor::<TestBackend, 3>::ones([1, 2, 8], &device).mul_scalar(50.0);
        let x2 = Tensor::cat(vec![perturbed, noise], 1);
        let moved = attention.forward(x2, Some(key_padding_bias(mask)), None);

        reference
            .slice([0..1, 0..2, 0..8])
            .into_data()
            .assert_approx_eq(&moved.slice([0..1, 0..2, 0..8]).into_data(), 4);
    }
}
