use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dataset::{
    build_sample, DatasetError, EpisodeDataset, EpisodeLoader, RdTrackDataset, Sample,
    SequenceLengths,
};
use crate::records::BatchFile;

/// Causal adapter: every access cuts the episode to a prefix of uniformly
/// random length `t` in `[1, min(image_len, track_len)]` before the
/// fixed-length step (or `[1, len]` of whichever modality is non-empty), so training sees the partial observations met when
/// recognising a track that is still being formed.
///
/// Without a seed each access draws afresh. With a seed the draw depends only
/// on `(seed, epoch, index)`, so an epoch can be replayed exactly.
pub struct CausalRdTrackDataset {
    inner: RdTrackDataset,
    seed: Option<u64>,
    epoch: AtomicUsize,
}

impl CausalRdTrackDataset {
    pub fn new(
        batch_files: Vec<BatchFile>,
        loader: EpisodeLoader,
        lengths: SequenceLengths,
        seed: Option<u64>,
    ) -> Self {
        Self {
            inner: RdTrackDataset::new(batch_files, loader, lengths),
            seed,
            epoch: AtomicUsize::new(0),
        }
    }

    fn draw_prefix(&self, index: usize, observed: usize) -> usize {
        match self.seed {
            Some(seed) => {
                let epoch = self.epoch.load(Ordering::Relaxed) as u64;
                let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
                    ^ epoch.rotate_left(32)
                    ^ index as u64;
                StdRng::seed_from_u64(mixed).gen_range(1..=observed)
            }
            None => rand::thread_rng().gen_range(1..=observed),
        }
    }
}

impl EpisodeDataset for CausalRdTrackDataset {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get(&self, index: usize) -> Result<Sample, DatasetError> {
        let batch = self.inner.batch_file(index)?;
        let mut episode = self.inner.loader.load(batch)?;
        let observed = episode.prefix_span();
        if observed == 0 {
            return Err(DatasetError::EmptyEpisode(batch.track_file.clone()));
        }

        let prefix = self.draw_prefix(index, observed);
        episode.truncate(prefix);
        Ok(build_sample(
            &episode,
            self.inner.lengths,
            self.inner.loader.height,
            self.inner.loader.width,
            Some(prefix),
        ))
    }

    fn set_epoch(&self, epoch: usize) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }

    fn name(&self) -> &str {
        "rd-track-causal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::write_episode;
    use crate::prelude::StageConfig;
    use tempfile::TempDir;

    const LENGTHS: SequenceLengths = SequenceLengths {
        image_seq_len: 4,
        track_seq_len: 6,
    };

    fn dataset(root: &std::path::Path, seed: Option<u64>) -> CausalRdTrackDataset {
        let files = vec![write_episode(root, 1, 1, 6, 5)];
        CausalRdTrackDataset::new(
            files,
            EpisodeLoader::new(StageConfig::default(), 8, 8, false),
            LENGTHS,
            seed,
        )
    }

    #[test]
    fn prefix_stays_within_observed_length_and_cuts_both_modalities() {
        let root = TempDir::new().unwrap();
        let ds = dataset(root.path(), None);
        for _ in 0..8 {
            let sample = ds.get(0).unwrap();
            let t = sample.prefix_len.unwrap();
            assert!((1..=5).contains(&t));
            assert_eq!(sample.valid_steps, t);
            assert_eq!(sample.valid_frames, t.min(LENGTHS.image_seq_len));
            assert_eq!(sample.images.dim(), (4, 8, 8));
            assert_eq!(sample.track.dim(), (6, 15));
        }
    }

    #[test]
    fn trackless_episode_draws_over_the_image_sequence() {
        let root = TempDir::new().unwrap();
        let files = vec![write_episode(root.path(), 1, 1, 4, 0)];
        let ds = CausalRdTrackDataset::new(
            files,
            EpisodeLoader::new(StageConfig::default(), 8, 8, false),
            LENGTHS,
            None,
        );
        for _ in 0..8 {
            let sample = ds.get(0).unwrap();
            let t = sample.prefix_len.unwrap();
            assert!((1..=4).contains(&t));
            assert_eq!(sample.valid_frames, t);
            assert_eq!(sample.valid_steps, 0);
            assert_eq!(sample.track.dim(), (6, 15));
        }
    }

    #[test]
    fn seeded_draws_replay_per_epoch() {
        let root = TempDir::new().unwrap();
        let ds = dataset(root.path(), Some(11));
        ds.set_epoch(3);
        let first = ds.get(0).unwrap().prefix_len;
        let again = ds.get(0).unwrap().prefix_len;
        assert_eq!(first, again);
    }

    #[test]
    fn out_of_range_index_fails() {
        let root = TempDir::new().unwrap();
        let ds = dataset(root.path(), Some(1));
        assert!(matches!(
            ds.get(5),
            Err(DatasetError::IndexOutOfBounds { index: 5, len: 1 })
        ));
    }
}
