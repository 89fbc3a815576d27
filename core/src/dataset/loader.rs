use std::sync::Arc;

use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::runtime::{Builder, Runtime};

use crate::dataset::{DatasetError, EpisodeDataset, Sample};

/// Batched iteration over an [`EpisodeDataset`].
///
/// Samples of a batch are loaded on a pool of `num_workers` blocking threads;
/// with one worker or fewer everything runs on the caller's thread. Any failed
/// load aborts the batch.
pub struct DataLoader {
    dataset: Arc<dyn EpisodeDataset>,
    batch_size: usize,
    shuffle: bool,
    seed: Option<u64>,
    runtime: Option<Runtime>,
}

impl DataLoader {
    pub fn new(
        dataset: Arc<dyn EpisodeDataset>,
        batch_size: usize,
        shuffle: bool,
        seed: Option<u64>,
        num_workers: usize,
    ) -> Result<Self, DatasetError> {
        if batch_size == 0 {
            return Err(DatasetError::InvalidConfig(
                "batch_size must be non-zero".into(),
            ));
        }
        let runtime = if num_workers > 1 {
            Some(
                Builder::new_multi_thread()
                    .worker_threads(1)
                    .max_blocking_threads(num_workers)
                    .thread_name("rtr-loader")
                    .build()
                    .map_err(|err| DatasetError::Worker(err.to_string()))?,
            )
        } else {
            None
        };
        Ok(Self {
            dataset,
            batch_size,
            shuffle,
            seed,
            runtime,
        })
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Visiting order for `epoch`; reproducible when a seed is set.
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            let mut rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(epoch as u64)),
                None => StdRng::from_entropy(),
            };
            order.shuffle(&mut rng);
        }
        order
    }

    /// Starts an epoch: informs the dataset and returns the batch iterator.
    pub fn epoch(&self, epoch: usize) -> BatchIter<'_> {
        self.dataset.set_epoch(epoch);
        BatchIter {
            loader: self,
            order: self.epoch_order(epoch),
            cursor: 0,
        }
    }

    fn load(&self, indices: &[usize]) -> Result<Vec<Sample>, DatasetError> {
        let Some(runtime) = &self.runtime else {
            return indices.iter().map(|&i| self.dataset.get(i)).collect();
        };

        runtime.block_on(async {
            let handles: Vec<_> = indices
                .iter()
                .map(|&index| {
                    let dataset = Arc::clone(&self.dataset);
                    tokio::task::spawn_blocking(move || dataset.get(index))
                })
                .collect();
            let mut samples = Vec::with_capacity(handles.len());
            for handle in handles {
                let sample = handle
                    .await
                    .map_err(|err| DatasetError::Worker(err.to_string()))??;
                samples.push(sample);
            }
            Ok::<_, DatasetError>(samples)
        })
    }
}

/// Iterator over the batches of one epoch.
pub struct BatchIter<'a> {
    loader: &'a DataLoader,
    order: Vec<usize>,
    cursor: usize,
}

impl Iterator for BatchIter<'_> {
    type Item = Result<Vec<Sample>, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.loader.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;
        debug!(
            "loading {} samples from {}",
            indices.len(),
            self.loader.dataset.name()
        );
        Some(self.loader.load(indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, Array3};
    use std::sync::Mutex;

    struct Counting {
        len: usize,
        epochs: Mutex<Vec<usize>>,
    }

    impl EpisodeDataset for Counting {
        fn len(&self) -> usize {
            self.len
        }

        fn get(&self, index: usize) -> Result<Sample, DatasetError> {
            if index >= self.len {
                return Err(DatasetError::IndexOutOfBounds {
                    index,
                    len: self.len,
                });
            }
            Ok(Sample {
                images: Array3::zeros((2, 4, 4)),
                image_mask: Array1::ones(2),
                track: Array2::zeros((3, 15)),
                track_mask: Array1::ones(3),
                label: index % 2,
                valid_frames: 2,
                valid_steps: 3,
                prefix_len: None,
                time_target: 1.0,
                skipped_frames: 0,
            })
        }

        fn set_epoch(&self, epoch: usize) {
            self.epochs.lock().unwrap().push(epoch);
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn counting(len: usize) -> Arc<Counting> {
        Arc::new(Counting {
            len,
            epochs: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn batches_cover_every_index_once() {
        let dataset = counting(7);
        let loader = DataLoader::new(dataset.clone(), 3, true, Some(5), 1).unwrap();
        assert_eq!(loader.num_batches(), 3);

        let batches: Vec<Vec<Sample>> = loader.epoch(2).map(|b| b.unwrap()).collect();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(*dataset.epochs.lock().unwrap(), vec![2]);
    }

    #[test]
    fn seeded_shuffle_is_reproducible_per_epoch() {
        let loader = DataLoader::new(counting(20), 4, true, Some(9), 1).unwrap();
        assert_eq!(loader.epoch_order(1), loader.epoch_order(1));
        let mut sorted = loader.epoch_order(1);
        sorted.sort();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn worker_pool_loads_batches() {
        let loader = DataLoader::new(counting(5), 2, false, None, 3).unwrap();
        let labels: Vec<usize> = loader
            .epoch(0)
            .flat_map(|b| b.unwrap())
            .map(|s| s.label)
            .collect();
        assert_eq!(labels, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(matches!(
            DataLoader::new(counting(1), 0, false, None, 1),
            Err(DatasetError::InvalidConfig(_))
        ));
    }
}
