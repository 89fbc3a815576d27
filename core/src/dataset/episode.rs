use ndarray::{s, Array2};

use crate::dataset::DatasetError;
use crate::prelude::{StageConfig, StageError};
use crate::processing::RdPipeline;
use crate::records::{read_points, read_tracks, timestep_features, BatchFile, RawFrameReader};
use crate::telemetry::log::LogManager;

/// A fully loaded, variable-length recognition episode.
#[derive(Debug, Clone)]
pub struct Episode {
    /// RD images, each `[height, width]`.
    pub frames: Vec<Array2<f32>>,
    /// Per-timestep features, `[steps, TIMESTEP_FEATURES]`.
    pub track: Array2<f32>,
    pub label: usize,
    /// Raw frames that were dropped by the processing stages.
    pub skipped_frames: usize,
}

impl Episode {
    pub fn image_len(&self) -> usize {
        self.frames.len()
    }

    pub fn track_len(&self) -> usize {
        self.track.nrows()
    }

    /// Prefix length both modalities can be cut to.
    pub fn observed_len(&self) -> usize {
        self.image_len().min(self.track_len())
    }

    /// Upper bound for a causal prefix cut. Falls back to the non-empty
    /// modality when the other one has no entries.
    pub fn prefix_span(&self) -> usize {
        match (self.image_len(), self.track_len()) {
            (0, steps) => steps,
            (frames, 0) => frames,
            (frames, steps) => frames.min(steps),
        }
    }

    /// Keeps the first `len` entries of both modalities.
    pub fn truncate(&mut self, len: usize) {
        self.frames.truncate(len);
        let steps = len.min(self.track.nrows());
        self.track = self.track.slice(s![..steps, ..]).to_owned();
    }
}

/// Reads the three files of a [`BatchFile`] and runs the RD processing chain.
#[derive(Debug, Clone)]
pub struct EpisodeLoader {
    pub stage: StageConfig,
    pub height: usize,
    pub width: usize,
    pub normalize: bool,
}

impl EpisodeLoader {
    pub fn new(stage: StageConfig, height: usize, width: usize, normalize: bool) -> Self {
        Self {
            stage,
            height,
            width,
            normalize,
        }
    }

    pub fn load(&self, batch: &BatchFile) -> Result<Episode, DatasetError> {
        let logger = LogManager::new("episode");
        let label = batch
            .class_index()
            .ok_or(DatasetError::InvalidLabel(batch.label))?;

        let mut pipeline = RdPipeline::new(&self.stage, self.height, self.width, self.normalize)?;
        let mut frames = Vec::new();
        let mut skipped = 0;
        for frame in RawFrameReader::open(&batch.raw_file)? {
            let Ok(frame) = frame else {
                skipped += 1;
                continue;
            };
            match pipeline.process(frame) {
                Ok(image) => frames.push(image),
                Err(StageError::Rejected(reason)) | Err(StageError::InvalidInput(reason)) => {
                    logger.detail(&format!("{}: {}", batch.raw_file.display(), reason));
                    skipped += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
        if frames.is_empty() {
            return Err(DatasetError::EmptyEpisode(batch.raw_file.clone()));
        }

        let points = read_points(&batch.point_file)?;
        let tracks = read_tracks(&batch.track_file)?;
        let track = timestep_features(&points, &tracks);

        logger.detail(&format!(
            "batch {} label {}: {} frames ({} skipped), {} track steps",
            batch.batch_num,
            batch.label,
            frames.len(),
            skipped,
            track.nrows()
        ));

        Ok(Episode {
            frames,
            track,
            label,
            skipped_frames: skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::write_episode;
    use crate::records::plots::TIMESTEP_FEATURES;
    use tempfile::TempDir;

    #[test]
    fn loader_reads_frames_and_track_features() {
        let root = TempDir::new().unwrap();
        let batch = write_episode(root.path(), 3, 2, 5, 7);
        let loader = EpisodeLoader::new(StageConfig::default(), 16, 16, true);

        let episode = loader.load(&batch).unwrap();
        assert_eq!(episode.label, 1);
        assert_eq!(episode.image_len(), 5);
        assert_eq!(episode.frames[0].dim(), (16, 16));
        assert_eq!(episode.track.dim(), (7, TIMESTEP_FEATURES));
        assert_eq!(episode.observed_len(), 5);
        assert_eq!(episode.skipped_frames, 0);
    }

    #[test]
    fn missing_raw_file_is_an_error() {
        let root = TempDir::new().unwrap();
        let mut batch = write_episode(root.path(), 3, 2, 1, 1);
        batch.raw_file = root.path().join("absent.dat");
        let loader = EpisodeLoader::new(StageConfig::default(), 8, 8, false);
        assert!(matches!(loader.load(&batch), Err(DatasetError::Record(_))));
    }

    #[test]
    fn truncate_cuts_both_modalities() {
        let mut episode = Episode {
            frames: vec![Array2::zeros((2, 2)); 6],
            track: Array2::zeros((4, 15)),
            label: 0,
            skipped_frames: 0,
        };
        episode.truncate(3);
        assert_eq!(episode.image_len(), 3);
        assert_eq!(episode.track_len(), 3);
    }

    #[test]
    fn prefix_span_ignores_an_empty_modality() {
        let mut episode = Episode {
            frames: vec![Array2::zeros((2, 2)); 4],
            track: Array2::zeros((0, 15)),
            label: 0,
            skipped_frames: 0,
        };
        assert_eq!(episode.observed_len(), 0);
        assert_eq!(episode.prefix_span(), 4);

        episode.track = Array2::zeros((7, 15));
        assert_eq!(episode.prefix_span(), 4);

        episode.frames.clear();
        assert_eq!(episode.prefix_span(), 7);
    }
}
