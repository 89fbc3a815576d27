//! Episode datasets: load a [`BatchFile`](crate::records::BatchFile), bring
//! both modalities to fixed lengths and hand out [`Sample`]s.
//!
//! Two adapters share the loading path:
//!
//! - [`RdTrackDataset`] pads or subsamples the full episode.
//! - [`CausalRdTrackDataset`] first cuts the episode to a random prefix, to
//!   mimic recognition on a partially observed track.
//!
//! [`DataLoader`] batches either one and [`collate`] stacks a batch into
//! burn tensors.

pub mod batch;
pub mod causal;
pub mod episode;
pub mod loader;
pub mod standard;

use std::path::PathBuf;

use ndarray::{Array1, Array2, Array3};

use crate::math::stats::StatsHelper;
use crate::prelude::StageError;
use crate::records::RecordError;

pub use batch::{collate, RadarBatch};
pub use causal::CausalRdTrackDataset;
pub use episode::{Episode, EpisodeLoader};
pub use loader::DataLoader;
pub use standard::RdTrackDataset;

/// Errors raised while building samples.
#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    #[error("index {index} is out of bounds for dataset of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("label {0} has no class index (labels are 1-based)")]
    InvalidLabel(u32),
    #[error("episode {0} produced no usable frames")]
    EmptyEpisode(PathBuf),
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("invalid loader configuration: {0}")]
    InvalidConfig(String),
    #[error("data loading worker failed: {0}")]
    Worker(String),
}

/// One fixed-length training example.
#[derive(Debug, Clone)]
pub struct Sample {
    /// RD images, `[image_seq_len, height, width]`.
    pub images: Array3<f32>,
    /// 1 for real frames, 0 for padding.
    pub image_mask: Array1<f32>,
    /// Per-timestep track features, `[track_seq_len, TIMESTEP_FEATURES]`.
    pub track: Array2<f32>,
    pub track_mask: Array1<f32>,
    /// Zero-based class.
    pub label: usize,
    /// Frames observed before padding (at most `image_seq_len`).
    pub valid_frames: usize,
    pub valid_steps: usize,
    /// Prefix length drawn by the causal adapter.
    pub prefix_len: Option<usize>,
    /// Regression target of the time head: observed share of the image window.
    ///
    /// Placeholder target. It is recoverable from `image_mask`, so it does not
    /// carry a recognition latency label.
    pub time_target: f32,
    /// Raw frames of the episode dropped during RD processing.
    pub skipped_frames: usize,
}

/// Common interface of the episode datasets.
pub trait EpisodeDataset: Send + Sync {
    fn len(&self) -> usize;

    /// Loads the sample at `index` from disk.
    fn get(&self, index: usize) -> Result<Sample, DatasetError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Announces the epoch about to start; seeded adapters derive draws from it.
    fn set_epoch(&self, _epoch: usize) {}

    fn name(&self) -> &str;
}

/// Fixed sequence lengths shared by both adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceLengths {
    pub image_seq_len: usize,
    pub track_seq_len: usize,
}

/// Picks which source rows fill a window of `target` slots: every row when it
/// fits, otherwise evenly spaced rows.
fn window_rows(len: usize, target: usize) -> Vec<usize> {
    if len <= target {
        (0..len).collect()
    } else {
        StatsHelper::linspace_indices(len, target)
    }
}

pub(crate) fn fit_frames(
    frames: &[Array2<f32>],
    target: usize,
    height: usize,
    width: usize,
) -> (Array3<f32>, Array1<f32>, usize) {
    let rows = window_rows(frames.len(), target);
    let mut images = Array3::zeros((target, height, width));
    let mut mask = Array1::zeros(target);
    for (slot, &src) in rows.iter().enumerate() {
        images
            .index_axis_mut(ndarray::Axis(0), slot)
            .assign(&frames[src]);
        mask[slot] = 1.0;
    }
    (images, mask, rows.len())
}

pub(crate) fn fit_track(track: &Array2<f32>, target: usize) -> (Array2<f32>, Array1<f32>, usize) {
    let rows = window_rows(track.nrows(), target);
    let mut out = Array2::zeros((target, track.ncols()));
    let mut mask = Array1::zeros(target);
    for (slot, &src) in rows.iter().enumerate() {
        out.row_mut(slot).assign(&track.row(src));
        mask[slot] = 1.0;
    }
    (out, mask, rows.len())
}

/// Builds the fixed-length sample for an (already sliced) episode.
pub(crate) fn build_sample(
    episode: &Episode,
    lengths: SequenceLengths,
    height: usize,
    width: usize,
    prefix_len: Option<usize>,
) -> Sample {
    let (images, image_mask, valid_frames) =
        fit_frames(&episode.frames, lengths.image_seq_len, height, width);
    let (track, track_mask, valid_steps) = fit_track(&episode.track, lengths.track_seq_len);
    Sample {
        images,
        image_mask,
        track,
        track_mask,
        label: episode.label,
        valid_frames,
        valid_steps,
        prefix_len,
        time_target: valid_frames as f32 / lengths.image_seq_len.max(1) as f32,
        skipped_frames: episode.skipped_frames,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::records::batch::{POINT_DIR, RAW_DIR, TRACK_DIR};
    use crate::records::plots::{PointRecord, TrackRecord, POINT_HEADER, TRACK_HEADER};
    use crate::records::{encode_frame, BatchFile};
    use crate::processing::mtd::tests::tone_frame;
    use std::fs;
    use std::path::Path;

    /// Writes one episode in the on-disk layout and returns its file set.
    pub(crate) fn write_episode(
        root: &Path,
        batch_num: u32,
        label: u32,
        frames: usize,
        steps: usize,
    ) -> BatchFile {
        for dir in [RAW_DIR, POINT_DIR, TRACK_DIR] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        let mut raw = Vec::new();
        for i in 0..frames {
            let input = tone_frame(32, 2 + i % 3);
            raw.extend(encode_frame(&input.params, &input.samples));
        }
        let raw_file = root.join(RAW_DIR).join(format!("{}_Label_{}.dat", batch_num, label));
        fs::write(&raw_file, raw).unwrap();

        let mut points = vec![POINT_HEADER.join(",")];
        let mut tracks = vec![TRACK_HEADER.join(",")];
        for i in 0..steps {
            let t = i as f64 * 0.1;
            points.push(
                PointRecord {
                    time: t,
                    batch: batch_num,
                    range: 1500.0 + i as f64,
                    azimuth: 10.0,
                    elevation: 2.0,
                    doppler: -3.0,
                    amplitude: 800.0,
                    snr: 15.0,
                    point_count: 2.0,
                }
                .to_line(),
            );
            tracks.push(
                TrackRecord {
                    time: t,
                    batch: batch_num,
                    range: 1500.0 + i as f64,
                    azimuth: 10.0,
                    elevation: 2.0,
                    speed: 20.0,
                    vx: 10.0,
                    vy: 15.0,
                    vz: 0.5,
                    heading: 45.0,
                }
                .to_line(),
            );
        }
        let point_file = root
            .join(POINT_DIR)
            .join(format!("PointTracks_{}_{}_{}.txt", batch_num, label, steps));
        let track_file = root
            .join(TRACK_DIR)
            .join(format!("Tracks_{}_{}_{}.txt", batch_num, label, steps));
        fs::write(&point_file, points.join("\n")).unwrap();
        fs::write(&track_file, tracks.join("\n")).unwrap();

        BatchFile {
            batch_num,
            label,
            raw_file,
            point_file,
            track_file,
        }
    }

    #[test]
    fn window_rows_pads_or_subsamples() {
        assert_eq!(window_rows(3, 5), vec![0, 1, 2]);
        assert_eq!(window_rows(9, 3), vec![0, 4, 8]);
    }

    #[test]
    fn time_target_is_observed_share_of_image_window() {
        let episode = Episode {
            frames: vec![Array2::zeros((8, 8)); 3],
            track: Array2::zeros((5, 15)),
            label: 0,
            skipped_frames: 0,
        };
        let lengths = SequenceLengths {
            image_seq_len: 4,
            track_seq_len: 6,
        };
        let sample = build_sample(&episode, lengths, 8, 8, None);
        assert_eq!(sample.valid_frames, 3);
        assert!((sample.time_target - 0.75).abs() < 1e-6);
        let mask_share = sample.image_mask.sum() / lengths.image_seq_len as f32;
        assert!((sample.time_target - mask_share).abs() < 1e-6);
    }

    #[test]
    fn fit_track_masks_padding() {
        let track = Array2::from_elem((2, 15), 1.0f32);
        let (out, mask, valid) = fit_track(&track, 4);
        assert_eq!(out.dim(), (4, 15));
        assert_eq!(mask.to_vec(), vec![1.0, 1.0, 0.0, 0.0]);
        assert_eq!(valid, 2);
        assert!(out.row(3).iter().all(|&v| v == 0.0));
    }
}
