pub mod batch;
pub mod plots;
pub mod raw;

use std::path::PathBuf;

pub use batch::{discover_batch_files, split_train_val, BatchFile};
pub use plots::{read_points, read_tracks, timestep_features, PointRecord, TrackRecord};
pub use raw::{encode_frame, FrameParameters, RawFrame, RawFrameReader};

/// Errors raised while reading episode files.
#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid frame at byte {offset}: {reason}")]
    InvalidFrame { offset: usize, reason: String },
    #[error("{path} line {line}: {reason}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("data root {0} must contain the raw, point and track directories")]
    MissingDirectories(PathBuf),
    #[error("no `<batch>_Label_<label>.dat` episodes found under {0}")]
    NoBatchFiles(PathBuf),
}
