//! Core library for radar target recognition.
//!
//! Raw echo, point and track records are decoded in [`records`], turned into
//! range-Doppler images by the stages in [`processing`], assembled into
//! fixed-length samples by [`dataset`], and classified by the fusion models in
//! [`model`]. [`loss`] and [`schedule`] hold the training-side pieces the
//! driver needs.

pub mod dataset;
pub mod loss;
pub mod math;
pub mod model;
pub mod prelude;
pub mod processing;
pub mod records;
pub mod schedule;
pub mod telemetry;

pub use prelude::{ProcessingStage, StageConfig, StageInput, StageOutput};
