//! Taper windows applied along slow time before the Doppler FFT.

use std::f64::consts::PI;

/// Taylor window with `nbar` nearly constant-level sidelobes at `sll` dB below
/// the main lobe, normalised so the continuous window peaks at 1.
///
/// Follows the symmetric definition used by `scipy.signal.windows.taylor`.
pub fn taylor(len: usize, nbar: usize, sll: f64) -> Vec<f64> {
    if len == 0 {
        return Vec::new();
    }
    if len == 1 {
        return vec![1.0];
    }

    let b = 10f64.powf(sll / 20.0);
    let a = b.acosh() / PI;
    let nbar_f = nbar as f64;
    let s2 = nbar_f * nbar_f / (a * a + (nbar_f - 0.5).powi(2));

    let ma: Vec<f64> = (1..nbar).map(|m| m as f64).collect();
    let m2: Vec<f64> = ma.iter().map(|m| m * m).collect();

    let fm: Vec<f64> = (0..ma.len())
        .map(|mi| {
            let sign = if mi % 2 == 0 { 1.0 } else { -1.0 };
            let numer = sign
                * ma
                    .iter()
                    .map(|m| 1.0 - m2[mi] / s2 / (a * a + (m - 0.5).powi(2)))
                    .product::<f64>();
            let denom = 2.0
                * m2
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != mi)
                    .map(|(_, other)| 1.0 - m2[mi] / other)
                    .product::<f64>();
            numer / denom
        })
        .collect();

    let n = len as f64;
    let w = |x: f64| {
        1.0 + 2.0
            * ma.iter()
                .zip(&fm)
                .map(|(m, f)| f * (2.0 * PI * m * (x - n / 2.0 + 0.5) / n).cos())
                .sum::<f64>()
    };

    let scale = 1.0 / w((n - 1.0) / 2.0);
    (0..len).map(|i| w(i as f64) * scale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taylor_is_symmetric_and_peaks_at_one() {
        let window = taylor(33, 4, 30.0);
        assert_eq!(window.len(), 33);
        for i in 0..33 {
            assert!((window[i] - window[32 - i]).abs() < 1e-9);
        }
        assert!((window[16] - 1.0).abs() < 1e-9);
        assert!(window[0] > 0.0 && window[0] < 0.5);
    }

    #[test]
    fn taylor_matches_reference_values() {
        let expected = [
            0.279_346_30,
            0.514_959_90,
            0.797_301_53,
            0.975_610_72,
            0.975_610_72,
            0.797_301_53,
            0.514_959_90,
            0.279_346_30,
        ];
        let window = taylor(8, 4, 30.0);
        assert_eq!(window.len(), expected.len());
        for (got, want) in window.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} != {want}");
        }
    }

    #[test]
    fn taylor_handles_degenerate_lengths() {
        assert!(taylor(0, 4, 30.0).is_empty());
        assert_eq!(taylor(1, 4, 30.0), vec![1.0]);
        let even = taylor(64, 4, 30.0);
        assert!(even.iter().all(|&v| v > 0.0 && v <= 1.0 + 1e-9));
    }
}
