pub struct StatsHelper;

impl StatsHelper {
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|&v| v * v).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    /// Percentile with linear interpolation between closest ranks (`numpy.percentile` default).
    pub fn percentile(samples: &[f32], q: f64) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let rank = q.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let frac = (rank - lower as f64) as f32;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }

    /// Indices of `numpy.linspace(0, len - 1, count)` truncated to integers.
    pub fn linspace_indices(len: usize, count: usize) -> Vec<usize> {
        if count == 0 || len == 0 {
            return Vec::new();
        }
        if count == 1 {
            return vec![0];
        }
        let step = (len - 1) as f64 / (count - 1) as f64;
        (0..count)
            .map(|i| {
                if i == count - 1 {
                    len - 1
                } else {
                    ((i as f64 * step) as usize).min(len - 1)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_zero_sequence_yields_zero() {
        assert_eq!(StatsHelper::rms(&[]), 0.0);
        assert_eq!(StatsHelper::rms(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn rms_handles_single_value() {
        assert_eq!(StatsHelper::rms(&[4.0]), 4.0);
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(StatsHelper::percentile(&values, 0.0), 1.0);
        assert_eq!(StatsHelper::percentile(&values, 50.0), 3.0);
        assert_eq!(StatsHelper::percentile(&values, 100.0), 5.0);
        assert!((StatsHelper::percentile(&values, 5.0) - 1.2).abs() < 1e-6);
    }

    #[test]
    fn linspace_indices_cover_both_ends() {
        let idx = StatsHelper::linspace_indices(10, 4);
        assert_eq!(idx, vec![0, 3, 6, 9]);
        assert_eq!(StatsHelper::linspace_indices(5, 1), vec![0]);
        assert!(StatsHelper::linspace_indices(0, 3).is_empty());
    }
}
