use ndarray::Array2;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::records::FrameParameters;

/// Shared configuration for the range-Doppler processing stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Range bin holding the target centre within the 31-bin window.
    pub center_bin: usize,
    /// Half-width of the peak search gate, in bins.
    pub gate_radius: usize,
    /// Largest absolute radial velocity kept in the RD map (m/s).
    pub max_velocity: f64,
    /// Columns zeroed below the zero-velocity column.
    pub notch_below: usize,
    /// Columns zeroed above (and including) the zero-velocity column.
    pub notch_above: usize,
    /// Percentile under which magnitudes are floored to zero.
    pub floor_percentile: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            center_bin: 15,
            gate_radius: 5,
            max_velocity: 56.0,
            notch_below: 4,
            notch_above: 3,
            floor_percentile: 5.0,
        }
    }
}

/// Input payload for a processing stage: one frame laid out `[range, slow time]`.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub samples: Array2<Complex32>,
    pub params: FrameParameters,
}

/// Output produced by each stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub samples: Array2<Complex32>,
    pub metadata: StageMetadata,
}

/// Metadata used for chaining stages and telemetry.
#[derive(Debug, Clone, Default)]
pub struct StageMetadata {
    pub velocity_axis: Option<Vec<f64>>,
    pub peak: Option<(usize, usize)>,
    pub magnitude: Option<Array2<f32>>,
    pub notes: Vec<String>,
}

/// Common error type for stage execution.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("buffer exhaustion: {0}")]
    BufferExhaustion(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The frame is well formed but unusable (bad velocity axis, peak off-grid).
    #[error("frame rejected: {0}")]
    Rejected(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type StageResult<T> = Result<T, StageError>;

/// Trait describing object-oriented signal-processing stages.
pub trait ProcessingStage {
    fn initialize(&mut self, config: &StageConfig) -> StageResult<()>;
    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput>;
    fn cleanup(&mut self);
}
