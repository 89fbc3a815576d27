use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};

/// Helper that wraps the `rustfft` planner for reuse across rows of equal length.
pub struct FftHelper {
    fft: std::sync::Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex32::zero(); fft.get_inplace_scratch_len()];
        Self { fft, scratch }
    }

    pub fn len(&self) -> usize {
        self.fft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fft.len() == 0
    }

    /// Transforms `buffer` in place. The buffer is zero-padded or cut to the planned length.
    pub fn forward_in_place(&mut self, buffer: &mut Vec<Complex32>) {
        buffer.resize(self.fft.len(), Complex32::zero());
        self.fft.process_with_scratch(buffer, &mut self.scratch);
    }

    pub fn forward(&mut self, input: &[Complex32]) -> Vec<Complex32> {
        let mut buffer = input.to_vec();
        self.forward_in_place(&mut buffer);
        buffer
    }
}

/// Moves the zero-frequency bin to the centre, matching `numpy.fft.fftshift`.
pub fn fftshift<T>(values: &mut [T]) {
    let half = values.len() / 2;
    values.rotate_right(half);
}
