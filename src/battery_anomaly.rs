use serde::{Deserialize, Serialize};

/// Operating parameters for battery-voltage outlier detection.
///
/// `min_samples` is deliberately configurable: deployments differ on how
/// much history a device needs before its voltage band is trustworthy.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BatteryConfig {
    /// History must hold strictly more samples than this before any reading
    /// is flagged.
    pub min_samples: usize,
    /// Half-width of the acceptance band in standard deviations.
    pub band_sigma: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        BatteryConfig {
            min_samples: 30,
            band_sigma: 0.5,
        }
    }
}

/// Details of a flagged voltage pair, carried into the alert message.
#[derive(Clone, Copy, Debug)]
pub struct BatteryReport {
    pub v1: f64,
    pub v2: f64,
    pub v1_out_of_band: bool,
    pub v2_out_of_band: bool,
}

/// Flag the latest voltage pair if either rail falls outside its rolling
/// statistical band.
///
/// History excludes the latest sample. Each rail is tested independently
/// against `[mean - band_sigma * stddev, mean + band_sigma * stddev]` over its
/// own history (population standard deviation); a fault on either battery
/// line is reportable, so the results combine with OR. A zero-variance
/// history collapses the band to a single point and any deviation from it is
/// anomalous; no division is involved, so constant history is safe.
pub fn check(
    latest_v1: f64,
    latest_v2: f64,
    hist_v1: &[f64],
    hist_v2: &[f64],
    config: &BatteryConfig,
) -> Option<BatteryReport> {
    if hist_v1.len() <= config.min_samples || hist_v2.len() <= config.min_samples {
        return None;
    }

    let v1_out = out_of_band(latest_v1, hist_v1, config.band_sigma);
    let v2_out = out_of_band(latest_v2, hist_v2, config.band_sigma);

    if v1_out || v2_out {
        Some(BatteryReport {
            v1: latest_v1,
            v2: latest_v2,
            v1_out_of_band: v1_out,
            v2_out_of_band: v2_out,
        })
    } else {
        None
    }
}

fn out_of_band(latest: f64, history: &[f64], band_sigma: f64) -> bool {
    let mean = mean(history);
    let stddev = population_std_dev(history, mean);
    let half_width = band_sigma * stddev;

    latest < mean - half_width || latest > mean + half_width
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(min_samples: usize) -> BatteryConfig {
        BatteryConfig {
            min_samples,
            band_sigma: 0.5,
        }
    }

    #[test]
    fn test_population_std_dev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&values);
        assert_relative_eq!(m, 5.0);
        assert_relative_eq!(population_std_dev(&values, m), 2.0);
    }

    #[test]
    fn test_requires_minimum_history() {
        let hist = vec![50.0; 30];
        // Exactly min_samples is not enough; the policy is strictly more
        assert!(check(30.0, 30.0, &hist, &hist, &config(30)).is_none());

        let hist = vec![50.0; 31];
        assert!(check(30.0, 30.0, &hist, &hist, &config(30)).is_some());
    }

    #[test]
    fn test_zero_variance_history_flags_any_deviation() {
        // Identical history: stddev is 0, the band collapses to [50, 50]
        let hist = vec![50.0; 40];
        let report = check(49.0, 50.0, &hist, &hist, &config(30)).expect("must flag");
        assert!(report.v1_out_of_band);
        assert!(!report.v2_out_of_band);
    }

    #[test]
    fn test_zero_variance_exact_match_passes() {
        let hist = vec![50.0; 40];
        assert!(check(50.0, 50.0, &hist, &hist, &config(30)).is_none());
    }

    #[test]
    fn test_either_rail_triggers() {
        let hist_v1 = vec![50.0; 40];
        let hist_v2 = vec![60.0; 40];

        // Only V2 deviates
        let report = check(50.0, 40.0, &hist_v1, &hist_v2, &config(30)).expect("must flag");
        assert!(!report.v1_out_of_band);
        assert!(report.v2_out_of_band);
        assert_relative_eq!(report.v2, 40.0);
    }

    #[test]
    fn test_within_band_is_normal() {
        // Noisy history; latest well inside mean +/- 0.5 stddev
        let hist: Vec<f64> = (0..40).map(|i| 50.0 + if i % 2 == 0 { 2.0 } else { -2.0 }).collect();
        assert!(check(50.5, 50.5, &hist, &hist, &config(30)).is_none());
    }

    #[test]
    fn test_configurable_threshold() {
        let hist = vec![50.0; 5];
        // With the default of 30 the short history is ignored
        assert!(check(30.0, 30.0, &hist, &hist, &BatteryConfig::default()).is_none());
        // A deployment that trusts short history can lower the bar
        assert!(check(30.0, 30.0, &hist, &hist, &config(1)).is_some());
    }
}
