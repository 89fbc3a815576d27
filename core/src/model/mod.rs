//! Neural encoders and the fusion classifier.

pub(crate) mod attention;
pub mod fusion;
pub mod rope;
pub mod swin;
pub mod track;

pub use attention::MultiHeadSelfAttention;
pub use fusion::{FusionModel, FusionModelConfig, FusionOutput, TimeHead};
pub use swin::{SwinEncoder, SwinEncoderConfig};
pub use track::{TrackEncoder, TrackEncoderConfig};
