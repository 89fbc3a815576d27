pub mod fft;
pub mod interp;
pub mod stats;
pub mod window;

pub use fft::{fftshift, FftHelper};
pub use interp::resize_bilinear;
pub use stats::StatsHelper;
pub use window::taylor;
