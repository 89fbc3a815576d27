use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use crate::dataset::{DatasetError, Sample};

/// A stacked batch ready for the fusion model.
#[derive(Debug, Clone)]
pub struct RadarBatch<B: Backend> {
    /// `[batch, image_seq_len, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch, image_seq_len]`, 1 for real frames.
    pub image_mask: Tensor<B, 2>,
    /// `[batch, track_seq_len, features]`
    pub tracks: Tensor<B, 3>,
    /// `[batch, track_seq_len]`
    pub track_mask: Tensor<B, 2>,
    /// `[batch]`
    pub labels: Tensor<B, 1, Int>,
    /// `[batch]`
    pub time_targets: Tensor<B, 1>,
}

impl<B: Backend> RadarBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.labels.dims()[0]
    }
}

fn check_shape(expected: &[usize], actual: &[usize]) -> Result<(), DatasetError> {
    if expected != actual {
        return Err(DatasetError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Stacks samples of identical shape into a [`RadarBatch`].
pub fn collate<B: Backend>(
    samples: &[Sample],
    device: &B::Device,
) -> Result<RadarBatch<B>, DatasetError> {
    let first = samples
        .first()
        .ok_or_else(|| DatasetError::ShapeMismatch {
            expected: vec![1],
            actual: vec![0],
        })?;
    let image_shape = first.images.shape().to_vec();
    let track_shape = first.track.shape().to_vec();
    let n = samples.len();

    let mut images = Vec::with_capacity(n * first.images.len());
    let mut image_mask = Vec::with_capacity(n * image_shape[0]);
    let mut tracks = Vec::with_capacity(n * first.track.len());
    let mut track_mask = Vec::with_capacity(n * track_shape[0]);
    let mut labels = Vec::with_capacity(n);
    let mut time_targets = Vec::with_capacity(n);

    for sample in samples {
        check_shape(&image_shape, sample.images.shape())?;
        check_shape(&track_shape, sample.track.shape())?;
        images.extend(sample.images.iter().copied());
        image_mask.extend(sample.image_mask.iter().copied());
        tracks.extend(sample.track.iter().copied());
        track_mask.extend(sample.track_mask.iter().copied());
        labels.push(sample.label as i64);
        time_targets.push(sample.time_target);
    }

    let [s, h, w] = [image_shape[0], image_shape[1], image_shape[2]];
    let [t, f] = [track_shape[0], track_shape[1]];
    Ok(RadarBatch {
        images: Tensor::from_data(TensorData::new(images, [n, s, h, w]), device),
        image_mask: Tensor::from_data(TensorData::new(image_mask, [n, s]), device),
        tracks: Tensor::from_data(TensorData::new(tracks, [n, t, f]), device),
        track_mask: Tensor::from_data(TensorData::new(track_mask, [n, t]), device),
        labels: Tensor::from_data(TensorData::new(labels, [n]), device),
        time_targets: Tensor::from_data(TensorData::new(time_targets, [n]), device),
    })
}
