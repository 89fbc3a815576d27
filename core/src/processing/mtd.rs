use ndarray::Array2;
use num_complex::Complex32;

use crate::math::fft::{fftshift, FftHelper};
use crate::math::stats::StatsHelper;
use crate::math::window::taylor;
use crate::prelude::{
    ProcessingStage, StageConfig, StageError, StageInput, StageMetadata, StageOutput, StageResult,
};
use crate::processing::buffer_pool::BufferPool;
use crate::records::FrameParameters;
use crate::telemetry::log::LogManager;

pub const SPEED_OF_LIGHT: f64 = 3e8;
const TAYLOR_NBAR: usize = 4;
const TAYLOR_SLL_DB: f64 = 30.0;
const MAX_VELOCITY_STEP: f64 = 10_000.0;

/// Velocity of each shifted Doppler bin, `(k - prt_num / 2) * dv` with
/// `dv = c / (2 * prt_num * prt * freq)`.
pub fn velocity_axis(params: &FrameParameters) -> StageResult<Vec<f64>> {
    let prt_num = params.prt_num;
    let delta_v = SPEED_OF_LIGHT / (2.0 * prt_num as f64 * params.prt * params.freq);
    if !delta_v.is_finite() || delta_v <= 0.0 || delta_v > MAX_VELOCITY_STEP {
        return Err(StageError::Rejected(format!(
            "velocity resolution {} out of range",
            delta_v
        )));
    }
    let half = prt_num / 2;
    if half == 0 || prt_num % 2 != 0 {
        return Err(StageError::Rejected(format!(
            "prt_num {} does not give a symmetric velocity axis",
            prt_num
        )));
    }
    Ok((0..prt_num)
        .map(|k| (k as f64 - half as f64) * delta_v)
        .collect())
}

/// Moving-target-detection stage: Taylor taper, Doppler FFT per range cell and
/// a peak gate around the tracked target.
pub struct MtdStage {
    pool: BufferPool<Complex32>,
    config: Option<StageConfig>,
    fft: Option<FftHelper>,
    window: Vec<f32>,
    logger: LogManager,
}

impl MtdStage {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool: BufferPool::with_capacity(pool_size),
            config: None,
            fft: None,
            window: Vec::new(),
            logger: LogManager::new("mtd"),
        }
    }

    fn prepare(&mut self, prt_num: usize) {
        let planned = self.fft.as_ref().map(FftHelper::len);
        if planned != Some(prt_num) {
            self.fft = Some(FftHelper::new(prt_num));
            self.window = taylor(prt_num, TAYLOR_NBAR, TAYLOR_SLL_DB)
                .into_iter()
                .map(|w| w as f32)
                .collect();
        }
    }

    /// Finds the magnitude peak inside the gate centred on the tracked target.
    fn gate_peak(
        config: &StageConfig,
        spectrum: &Array2<Complex32>,
        params: &FrameParameters,
    ) -> StageResult<(usize, usize)> {
        let (rows, cols) = spectrum.dim();
        let half = (params.prt_num / 2) as i64;
        let unit = params
            .doppler_unit()
            .ok_or_else(|| StageError::Rejected("no track info".into()))? as i64;

        // the recorded unit refers to the unshifted spectrum and is 1-based
        let shifted = if unit > half { unit - half } else { unit + half };
        let doppler_centre = (shifted - 1).clamp(0, cols as i64 - 1) as usize;

        let radius = config.gate_radius;
        let row_start = config.center_bin.saturating_sub(radius);
        let row_end = (config.center_bin + radius + 1).min(rows);
        let col_start = doppler_centre.saturating_sub(radius);
        let col_end = (doppler_centre + radius + 1).min(cols);
        if row_start >= row_end || col_start >= col_end {
            return Err(StageError::Rejected("empty target gate".into()));
        }

        let mut best = (row_start, col_start);
        let mut best_mag = f32::NEG_INFINITY;
        for r in row_start..row_end {
            for c in col_start..col_end {
                let mag = spectrum[[r, c]].norm();
                if mag > best_mag {
                    best_mag = mag;
                    best = (r, c);
                }
            }
        }

        // the range axis spans centre_bin cells either side of the target
        let range_cells = 2 * config.center_bin + 1;
        if best.0 >= range_cells || best.1 >= params.prt_num {
            return Err(StageError::Rejected(format!(
                "peak {:?} outside the range/velocity axes",
                best
            )));
        }
        Ok(best)
    }
}

impl ProcessingStage for MtdStage {
    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;

        let params = &input.params;
        if !params.has_track() {
            return Err(StageError::Rejected("no track info".into()));
        }
        if params.prt <= 0.0 || params.prt_num == 0 || params.freq <= 0.0 {
            return Err(StageError::InvalidInput("non-positive frame parameters".into()));
        }
        let (rows, cols) = input.samples.dim();
        if cols != params.prt_num {
            return Err(StageError::InvalidInput(format!(
                "expected {} pulses, found {}",
                params.prt_num, cols
            )));
        }
        let velocity = velocity_axis(params)?;

        self.prepare(cols);
        let fft = self
            .fft
            .as_mut()
            .ok_or_else(|| StageError::Internal("FFT not configured".into()))?;

        let mut spectrum = Array2::<Complex32>::zeros((rows, cols));
        let mut buffer = self.pool.checkout(cols)?;
        for (r, row) in input.samples.rows().into_iter().enumerate() {
            for ((slot, sample), w) in buffer.iter_mut().zip(row.iter()).zip(&self.window) {
                *slot = *sample * *w;
            }
            fft.forward_in_place(&mut buffer);
            fftshift(&mut buffer);
            for (c, value) in buffer.iter().enumerate() {
                spectrum[[r, c]] = *value;
            }
        }
        self.pool.release(buffer);

        let peak = Self::gate_peak(&config, &spectrum, params)?;
        let magnitudes: Vec<f32> = spectrum.iter().map(|c| c.norm()).collect();
        let rms = StatsHelper::rms(&magnitudes);
        self.logger
            .detail(&format!("MTD peak {:?} RMS {:.4}", peak, rms));

        Ok(StageOutput {
            samples: spectrum,
            metadata: StageMetadata {
                velocity_axis: Some(velocity),
                peak: Some(peak),
                notes: vec![format!("MTD RMS {:.4}", rms)],
                ..Default::default()
            },
        })
    }

    fn cleanup(&mut self) {
        self.pool.reset();
        self.config = None;
        self.fft = None;
        self.window.clear();
    }
}
