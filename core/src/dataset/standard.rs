use crate::dataset::{
    build_sample, DatasetError, EpisodeDataset, EpisodeLoader, Sample, SequenceLengths,
};
use crate::records::BatchFile;

/// Standard adapter: the whole episode, padded or evenly subsampled to the
/// configured lengths. Files are re-read on every access.
pub struct RdTrackDataset {
    batch_files: Vec<BatchFile>,
    pub(crate) loader: EpisodeLoader,
    pub(crate) lengths: SequenceLengths,
}

impl RdTrackDataset {
    pub fn new(batch_files: Vec<BatchFile>, loader: EpisodeLoader, lengths: SequenceLengths) -> Self {
        Self {
            batch_files,
            loader,
            lengths,
        }
    }

    pub fn batch_files(&self) -> &[BatchFile] {
        &self.batch_files
    }

    pub(crate) fn batch_file(&self, index: usize) -> Result<&BatchFile, DatasetError> {
        self.batch_files
            .get(index)
            .ok_or(DatasetError::IndexOutOfBounds {
                index,
                len: self.batch_files.len(),
            })
    }
}

impl EpisodeDataset for RdTrackDataset {
    fn len(&self) -> usize {
        self.batch_files.len()
    }

    fn get(&self, index: usize) -> Result<Sample, DatasetError> {
        let batch = self.batch_file(index)?;
        let episode = self.loader.load(batch)?;
        Ok(build_sample(
            &episode,
            self.lengths,
            self.loader.height,
            self.loader.width,
            None,
        ))
    }

    fn name(&self) -> &str {
        "rd-track"
    }
}
