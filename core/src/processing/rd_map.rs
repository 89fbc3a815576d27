use ndarray::{Array2, Axis};

use crate::math::stats::StatsHelper;
use crate::prelude::{
    ProcessingStage, StageConfig, StageError, StageInput, StageMetadata, StageOutput, StageResult,
};
use crate::processing::mtd::velocity_axis;
use crate::telemetry::log::LogManager;

/// Turns an MTD spectrum into the magnitude range-Doppler image: crops to the
/// velocity span of interest, notches the zero-velocity clutter and floors
/// low-percentile cells.
pub struct RdMapStage {
    config: Option<StageConfig>,
    logger: LogManager,
}

impl RdMapStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new("rd-map"),
        }
    }
}

impl Default for RdMapStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for RdMapStage {
    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;

        let velocity = velocity_axis(&input.params)?;
        if velocity.len() != input.samples.ncols() {
            return Err(StageError::InvalidInput(format!(
                "spectrum has {} Doppler bins, velocity axis {}",
                input.samples.ncols(),
                velocity.len()
            )));
        }

        let kept: Vec<usize> = velocity
            .iter()
            .enumerate()
            .filter(|(_, v)| v.abs() < config.max_velocity)
            .map(|(k, _)| k)
            .collect();
        let zero_col = kept
            .iter()
            .position(|&k| velocity[k] == 0.0)
            .ok_or_else(|| StageError::Rejected("no zero-velocity bin".into()))?;

        let cropped = input.samples.select(Axis(1), &kept);
        let mut magnitude: Array2<f32> = cropped.mapv(|c| c.norm());

        let notch_start = zero_col.saturating_sub(config.notch_below);
        let notch_end = (zero_col + config.notch_above).min(magnitude.ncols());
        for c in notch_start..notch_end {
            magnitude.column_mut(c).fill(0.0);
        }

        let values: Vec<f32> = magnitude.iter().copied().collect();
        let floor = StatsHelper::percentile(&values, config.floor_percentile);
        magnitude.mapv_inplace(|v| if v < floor { 0.0 } else { v });

        self.logger.detail(&format!(
            "RD map {}x{} floor {:.4}",
            magnitude.nrows(),
            magnitude.ncols(),
            floor
        ));

        Ok(StageOutput {
            samples: cropped,
            metadata: StageMetadata {
                velocity_axis: Some(kept.iter().map(|&k| velocity[k]).collect()),
                magnitude: Some(magnitude),
                notes: vec![format!("floor {:.4}", floor)],
                ..Default::default()
            },
        })
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::mtd::tests::tone_frame;
    use crate::processing::mtd::MtdStage;

    #[test]
    fn rd_map_crops_notches_and_keeps_target() {
        let config = StageConfig::default();
        let mut mtd = MtdStage::new(2);
        mtd.initialize(&config).unwrap();
        let input = tone_frame(64, 5);
        let params = input.params.clone();
        let spectrum = mtd.execute(input).unwrap();

        let mut stage = RdMapStage::new();
        stage.initialize(&config).unwrap();
        let output = stage
            .execute(StageInput {
                samples: spectrum.samples,
                params,
            })
            .unwrap();

        let map = output.metadata.magnitude.unwrap();
        let axis = output.metadata.velocity_axis.unwrap();
        assert_eq!(map.nrows(), 31);
        assert_eq!(map.ncols(), axis.len());
        assert!(axis.iter().all(|v| v.abs() < 56.0));

        let zero = axis.iter().position(|&v| v == 0.0).unwrap();
        for c in zero - 4..zero + 3 {
            assert!(map.column(c).iter().all(|&v| v == 0.0));
        }
        // shifted bin 37 sits five columns right of zero velocity
        assert!(map[[15, zero + 5]] > 1.0);
        stage.cleanup();
    }

    #[test]
    fn rd_map_rejects_mismatched_spectrum() {
        let mut stage = RdMapStage::new();
        stage.initialize(&StageConfig::default()).unwrap();
        let mut input = tone_frame(16, 1);
        input.samples = Array2::zeros((31, 8));
        assert!(matches!(
            stage.execute(input),
            Err(StageError::InvalidInput(_))
        ));
    }
}
