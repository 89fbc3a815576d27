use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Running totals for one pass over a dataset split.
pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

#[derive(Default)]
struct Metrics {
    batches: usize,
    samples: usize,
    correct: usize,
    loss_sum: f64,
    time_loss_sum: f64,
    skipped_frames: usize,
}

/// Averages reported at the end of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub batches: usize,
    pub samples: usize,
    pub mean_loss: f64,
    pub mean_time_loss: f64,
    pub accuracy: f64,
    pub skipped_frames: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics::default()),
        }
    }

    /// Records one batch: its mean loss, mean time loss and correct predictions.
    pub fn record_batch(&self, batch_size: usize, loss: f64, time_loss: Option<f64>, correct: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.batches += 1;
            metrics.samples += batch_size;
            metrics.correct += correct;
            metrics.loss_sum += loss * batch_size as f64;
            metrics.time_loss_sum += time_loss.unwrap_or(0.0) * batch_size as f64;
        }
    }

    pub fn record_skipped_frames(&self, count: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.skipped_frames += count;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            let samples = metrics.samples.max(1) as f64;
            MetricsSnapshot {
                batches: metrics.batches,
                samples: metrics.samples,
                mean_loss: metrics.loss_sum / samples,
                mean_time_loss: metrics.time_loss_sum / samples,
                accuracy: metrics.correct as f64 / samples,
                skipped_frames: metrics.skipped_frames,
            }
        } else {
            MetricsSnapshot::default()
        }
    }

    pub fn reset(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            *metrics = Metrics::default();
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
