use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigurationError;
use crate::protocol::{FrequencyUnit, TimeUnit};

// each default logarithmic step is a 1 % jump
const LOG_STEP_RATIO: f64 = 1.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spacing {
    Linear,
    Logarithmic,
}

/// A validated sweep. `start` and `stop` are in MHz.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSpec {
    pub start: f64,
    pub stop: f64,
    pub steps: u32,
    pub dwell: Duration,
    pub spacing: Spacing,
}

impl SweepSpec {
    pub fn new(
        start: f64,
        stop: f64,
        steps: u32,
        dwell: Duration,
        spacing: Spacing,
    ) -> Result<Self, ConfigurationError> {
        let spec = Self { start, stop, steps, dwell, spacing };
        spec.validate()?;
        Ok(spec)
    }

    /// Builds a sweep from operator units, converting frequencies to MHz.
    #[allow(clippy::too_many_arguments)]
    pub fn from_units(
        start: f64,
        start_unit: FrequencyUnit,
        stop: f64,
        stop_unit: FrequencyUnit,
        steps: u32,
        dwell: f64,
        dwell_unit: TimeUnit,
        spacing: Spacing,
    ) -> Result<Self, ConfigurationError> {
        Self::new(
            start_unit.to_mhz(start),
            stop_unit.to_mhz(stop),
            steps,
            dwell_unit.to_duration(dwell)?,
            spacing,
        )
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.start.is_finite() || !self.stop.is_finite() {
            return Err(ConfigurationError::NotFinite);
        }
        if self.spacing == Spacing::Logarithmic {
            if self.steps <= 1 {
                return Err(ConfigurationError::TooFewLogSteps(self.steps));
            }
            if self.start <= 0.0 {
                return Err(ConfigurationError::NonPositiveLogStart(self.start));
            }
        }
        if self.steps == 0 {
            return Err(ConfigurationError::ZeroSteps);
        }
        if self.stop < self.start {
            return Err(ConfigurationError::InvertedRange {
                start: self.start,
                stop: self.stop,
            });
        }
        Ok(())
    }

    /// Every frequency the sweep emits, in order, produced one at a time.
    ///
    /// Linear spacing yields `steps + 1` values from `start` to `stop`
    /// inclusive; logarithmic yields `steps` values with a constant ratio.
    /// Values are computed from the step index so rounding never
    /// accumulates, and the last one is held at `stop`.
    pub fn frequencies(&self) -> impl Iterator<Item = f64> {
        let (start, stop, spacing) = (self.start, self.stop, self.spacing);
        let tolerance = stop.abs() * 1e-9;
        let (count, step) = match spacing {
            Spacing::Linear => (u64::from(self.steps) + 1, (stop - start) / f64::from(self.steps)),
            Spacing::Logarithmic => (
                u64::from(self.steps),
                (stop / start).powf(1.0 / f64::from(self.steps - 1)),
            ),
        };
        (0..count)
            .map(move |i| match spacing {
                Spacing::Linear => start + step * i as f64,
                Spacing::Logarithmic => start * step.powf(i as f64),
            })
            .take_while(move |f| *f <= stop + tolerance)
            .map(move |f| f.min(stop))
    }

    /// Completion percentage after `frequency` has been emitted; linear in
    /// log-frequency for logarithmic sweeps.
    pub fn progress(&self, frequency: f64) -> f64 {
        let fraction = match self.spacing {
            _ if self.stop == self.start => 1.0,
            Spacing::Linear => (frequency - self.start) / (self.stop - self.start),
            Spacing::Logarithmic => (frequency / self.start).ln() / (self.stop / self.start).ln(),
        };
        (fraction * 100.0).clamp(0.0, 100.0)
    }
}

/// Step count that makes every logarithmic step a 1 % jump.
pub fn default_log_step_count(start: f64, stop: f64) -> Result<u32, ConfigurationError> {
    if !start.is_finite() || !stop.is_finite() {
        return Err(ConfigurationError::NotFinite);
    }
    if start <= 0.0 {
        return Err(ConfigurationError::NonPositiveLogStart(start));
    }
    if stop < start {
        return Err(ConfigurationError::InvertedRange { start, stop });
    }
    let steps = ((stop / start).ln() / LOG_STEP_RATIO.ln()).floor() as u32 + 1;
    Ok(steps.max(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(start: f64, stop: f64, steps: u32, spacing: Spacing) -> SweepSpec {
        SweepSpec::new(start, stop, steps, Duration::ZERO, spacing).unwrap()
    }

    #[test]
    fn test_linear_includes_both_ends() {
        let s = spec(100.0, 200.0, 4, Spacing::Linear);
        assert_eq!(s.frequencies().collect::<Vec<_>>(), vec![100.0, 125.0, 150.0, 175.0, 200.0]);
    }

    #[test]
    fn test_logarithmic_constant_ratio() {
        let s = spec(100.0, 6000.0, 10, Spacing::Logarithmic);
        let f: Vec<f64> = s.frequencies().collect();
        assert_eq!(f.len(), 10);
        let ratio = 60f64.powf(1.0 / 9.0);
        for pair in f.windows(2) {
            assert!((pair[1] / pair[0] - ratio).abs() < 1e-9);
        }
        assert_eq!(f[0], 100.0);
        assert!(f[9] <= 6000.0);
        assert!((f[9] - 6000.0).abs() < 1e-6);
    }

    #[test]
    fn test_log_rejects_single_step() {
        let err = SweepSpec::new(100.0, 200.0, 1, Duration::ZERO, Spacing::Logarithmic).unwrap_err();
        assert_eq!(err, ConfigurationError::TooFewLogSteps(1));
    }

    #[test]
    fn test_log_rejects_zero_start() {
        let err = SweepSpec::new(0.0, 200.0, 10, Duration::ZERO, Spacing::Logarithmic).unwrap_err();
        assert_eq!(err, ConfigurationError::NonPositiveLogStart(0.0));
    }

    #[test]
    fn test_rejects_bad_ranges() {
        assert_eq!(
            SweepSpec::new(100.0, 200.0, 0, Duration::ZERO, Spacing::Linear).unwrap_err(),
            ConfigurationError::ZeroSteps
        );
        assert!(matches!(
            SweepSpec::new(300.0, 200.0, 4, Duration::ZERO, Spacing::Linear),
            Err(ConfigurationError::InvertedRange { .. })
        ));
        assert_eq!(
            SweepSpec::new(f64::NAN, 200.0, 4, Duration::ZERO, Spacing::Linear).unwrap_err(),
            ConfigurationError::NotFinite
        );
    }

    #[test]
    fn test_degenerate_linear_sweep_terminates() {
        let s = spec(500.0, 500.0, 3, Spacing::Linear);
        assert_eq!(s.frequencies().collect::<Vec<_>>(), vec![500.0; 4]);
        assert_eq!(s.progress(500.0), 100.0);
    }

    #[test]
    fn test_huge_step_count_is_produced_lazily() {
        let log = spec(100.0, 200.0, u32::MAX, Spacing::Logarithmic);
        let first: Vec<f64> = log.frequencies().take(3).collect();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], 100.0);
        assert!(first[1] > 100.0 && first[1] < first[2] && first[2] < 100.001);

        let lin = spec(0.0, 1000.0, u32::MAX, Spacing::Linear);
        let first: Vec<f64> = lin.frequencies().take(2).collect();
        assert_eq!(first[0], 0.0);
        assert!(first[1] > 0.0 && first[1] < 1e-6);
    }

    #[test]
    fn test_from_units_converts_to_mhz() {
        let s = SweepSpec::from_units(
            500.0,
            FrequencyUnit::KHz,
            2.0,
            FrequencyUnit::GHz,
            4,
            2.0,
            TimeUnit::Second,
            Spacing::Linear,
        )
        .unwrap();
        assert!((s.start - 0.5).abs() < 1e-12);
        assert!((s.stop - 2000.0).abs() < 1e-9);
        assert_eq!(s.dwell, Duration::from_secs(2));
    }

    #[test]
    fn test_progress() {
        let lin = spec(100.0, 200.0, 4, Spacing::Linear);
        assert_eq!(lin.progress(100.0), 0.0);
        assert_eq!(lin.progress(150.0), 50.0);

        let log = spec(10.0, 1000.0, 3, Spacing::Logarithmic);
        assert!((log.progress(100.0) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_log_step_count() {
        // ln(60) / ln(1.01) = 411.47..
        assert_eq!(default_log_step_count(100.0, 6000.0), Ok(412));
        assert_eq!(default_log_step_count(100.0, 100.0), Ok(2));
        assert!(default_log_step_count(0.0, 100.0).is_err());
    }
}
