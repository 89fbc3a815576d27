use ndarray::Array2;

use crate::math::interp::resize_bilinear;
use crate::prelude::{ProcessingStage, StageConfig, StageError, StageInput, StageResult};
use crate::processing::{MtdStage, RdMapStage};
use crate::records::RawFrame;

/// Chains the MTD and RD map stages and resizes each image to the model input size.
pub struct RdPipeline {
    mtd: MtdStage,
    rd_map: RdMapStage,
    height: usize,
    width: usize,
    normalize: bool,
}

impl RdPipeline {
    pub fn new(
        config: &StageConfig,
        height: usize,
        width: usize,
        normalize: bool,
    ) -> StageResult<Self> {
        if height == 0 || width == 0 {
            return Err(StageError::InvalidInput("image size must be non-zero".into()));
        }
        let mut mtd = MtdStage::new(1);
        mtd.initialize(config)?;
        let mut rd_map = RdMapStage::new();
        rd_map.initialize(config)?;
        Ok(Self {
            mtd,
            rd_map,
            height,
            width,
            normalize,
        })
    }

    /// Processes one raw frame into a `[height, width]` image.
    ///
    /// Frames the stages reject come back as [`StageError::Rejected`]; callers skip them.
    pub fn process(&mut self, frame: RawFrame) -> StageResult<Array2<f32>> {
        let params = frame.params;
        let spectrum = self.mtd.execute(StageInput {
            samples: frame.samples,
            params: params.clone(),
        })?;
        let output = self.rd_map.execute(StageInput {
            samples: spectrum.samples,
            params,
        })?;
        let magnitude = output
            .metadata
            .magnitude
            .ok_or_else(|| StageError::Internal("RD map stage produced no image".into()))?;

        let mut image = resize_bilinear(magnitude.view(), self.height, self.width);
        if self.normalize {
            let peak = image.iter().copied().fold(0.0f32, f32::max);
            if peak > 0.0 {
                image.mapv_inplace(|v| v / peak);
            }
        }
        Ok(image)
    }
}

impl Drop for RdPipeline {
    fn drop(&mut self) {
        self.mtd.cleanup();
        self.rd_map.cleanup();
    }
}
