//! Frequency and time units plus the normalization ladders applied to
//! operator input before it becomes a command.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigurationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum FrequencyUnit {
    #[serde(rename = "Hz")]
    Hz,
    #[serde(rename = "kHz")]
    KHz,
    #[serde(rename = "MHz")]
    MHz,
    #[serde(rename = "GHz")]
    GHz,
}

impl FrequencyUnit {
    /// The literal the instrument expects after a frequency value.
    pub fn wire(self) -> &'static str {
        match self {
            FrequencyUnit::Hz => "Hz",
            FrequencyUnit::KHz => "kHz",
            FrequencyUnit::MHz => "MHz",
            FrequencyUnit::GHz => "GHz",
        }
    }

    fn hz_per_unit(self) -> f64 {
        match self {
            FrequencyUnit::Hz => 1.0,
            FrequencyUnit::KHz => 1e3,
            FrequencyUnit::MHz => 1e6,
            FrequencyUnit::GHz => 1e9,
        }
    }

    pub fn to_hz(self, value: f64) -> f64 {
        value * self.hz_per_unit()
    }

    pub fn to_mhz(self, value: f64) -> f64 {
        value * self.hz_per_unit() / 1e6
    }
}

impl fmt::Display for FrequencyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire())
    }
}

impl FromStr for FrequencyUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Hz" | "hz" | "HZ" => Ok(FrequencyUnit::Hz),
            "kHz" | "khz" | "KHZ" => Ok(FrequencyUnit::KHz),
            "MHz" | "mhz" | "MHZ" => Ok(FrequencyUnit::MHz),
            "GHz" | "ghz" | "GHZ" => Ok(FrequencyUnit::GHz),
            other => Err(format!("unknown frequency unit '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "us", alias = "μs")]
    Microsecond,
    #[serde(rename = "ms")]
    Millisecond,
    #[serde(rename = "sec", alias = "s")]
    Second,
}

// shortest dwell the instrument can honour when given in microseconds
const MIN_DWELL_MICROS: f64 = 1.05;

impl TimeUnit {
    pub fn to_duration(self, value: f64) -> Result<Duration, ConfigurationError> {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "dwell",
                reason: format!("{} is not a valid duration", value),
            });
        }
        let secs = match self {
            TimeUnit::Microsecond => value.max(MIN_DWELL_MICROS) * 1e-6,
            TimeUnit::Millisecond => value * 1e-3,
            TimeUnit::Second => value,
        };
        Ok(Duration::from_secs_f64(secs))
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "us" | "μs" | "µs" => Ok(TimeUnit::Microsecond),
            "ms" => Ok(TimeUnit::Millisecond),
            "s" | "sec" => Ok(TimeUnit::Second),
            other => Err(format!("unknown time unit '{}'", other)),
        }
    }
}

/// Re-expresses a carrier frequency entered by an operator.
///
/// kHz above 1000 moves up to MHz and below 100 is clamped to 100 kHz, MHz
/// above 1000 moves up to GHz and below 0.1 is clamped, GHz is held inside
/// [0.0001, 6]. Hz is not an accepted carrier input unit and falls back to
/// 100 MHz.
pub fn normalize_frequency(value: f64, unit: FrequencyUnit) -> (f64, FrequencyUnit) {
    match unit {
        FrequencyUnit::KHz => {
            if value > 1000.0 {
                (value / 1000.0, FrequencyUnit::MHz)
            } else if value < 100.0 {
                (100.0, FrequencyUnit::KHz)
            } else {
                (value, unit)
            }
        }
        FrequencyUnit::MHz => {
            if value > 1000.0 {
                (value / 1000.0, FrequencyUnit::GHz)
            } else if value < 0.1 {
                (0.1, FrequencyUnit::MHz)
            } else {
                (value, unit)
            }
        }
        FrequencyUnit::GHz => (value.clamp(0.0001, 6.0), unit),
        FrequencyUnit::Hz => (100.0, FrequencyUnit::MHz),
    }
}

/// Modulation-rate ladder: Hz, kHz and MHz each carry their own thresholds.
/// GHz is not a modulation unit and falls back to 1 kHz.
pub fn normalize_modulation_frequency(value: f64, unit: FrequencyUnit) -> (f64, FrequencyUnit) {
    match unit {
        FrequencyUnit::Hz => {
            if value < 0.1 {
                (0.1, unit)
            } else if value > 1000.0 {
                (value / 1000.0, FrequencyUnit::KHz)
            } else {
                (value, unit)
            }
        }
        FrequencyUnit::KHz => {
            if value > 10000.0 {
                (value / 1000.0, FrequencyUnit::MHz)
            } else if value < 0.1 {
                (value * 1000.0, FrequencyUnit::Hz)
            } else {
                (value, unit)
            }
        }
        FrequencyUnit::MHz => {
            if value > 20.0 {
                (20.0, unit)
            } else if value < 0.1 {
                (value * 1000.0, FrequencyUnit::KHz)
            } else {
                (value, unit)
            }
        }
        FrequencyUnit::GHz => (1.0, FrequencyUnit::KHz),
    }
}

/// Holds a carrier setting inside the generator's 100 kHz to 6 GHz range.
pub fn clamp_carrier(value: f64, unit: FrequencyUnit) -> f64 {
    match unit {
        FrequencyUnit::GHz => value.clamp(0.000_000_001, 6.0),
        FrequencyUnit::MHz => value.clamp(0.1, 6000.0),
        FrequencyUnit::KHz => value.clamp(100.0, 6_000_000.0),
        FrequencyUnit::Hz => value.clamp(100_000.0, 6_000_000_000.0),
    }
}

/// Scales a frequency readback (always Hz on the wire) for display.
pub fn display_frequency(hz: f64) -> (f64, FrequencyUnit) {
    if hz < 1e6 {
        (hz / 1e3, FrequencyUnit::KHz)
    } else if hz < 1e9 {
        (hz / 1e6, FrequencyUnit::MHz)
    } else {
        (hz / 1e9, FrequencyUnit::GHz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_khz_above_threshold_moves_to_mhz() {
        let (v, u) = normalize_frequency(1500.0, FrequencyUnit::KHz);
        assert!(approx(v, 1.5));
        assert_eq!(u, FrequencyUnit::MHz);
    }

    #[test]
    fn test_khz_below_floor_is_clamped() {
        assert_eq!(normalize_frequency(50.0, FrequencyUnit::KHz), (100.0, FrequencyUnit::KHz));
    }

    #[test]
    fn test_mhz_ladder() {
        let (v, u) = normalize_frequency(2400.0, FrequencyUnit::MHz);
        assert!(approx(v, 2.4));
        assert_eq!(u, FrequencyUnit::GHz);
        assert_eq!(normalize_frequency(0.05, FrequencyUnit::MHz), (0.1, FrequencyUnit::MHz));
        assert_eq!(normalize_frequency(915.0, FrequencyUnit::MHz), (915.0, FrequencyUnit::MHz));
    }

    #[test]
    fn test_ghz_is_clamped() {
        assert_eq!(normalize_frequency(7.0, FrequencyUnit::GHz), (6.0, FrequencyUnit::GHz));
        assert_eq!(normalize_frequency(0.0, FrequencyUnit::GHz), (0.0001, FrequencyUnit::GHz));
    }

    #[test]
    fn test_hz_carrier_falls_back() {
        assert_eq!(normalize_frequency(42.0, FrequencyUnit::Hz), (100.0, FrequencyUnit::MHz));
    }

    #[test]
    fn test_modulation_ladder() {
        assert_eq!(normalize_modulation_frequency(0.01, FrequencyUnit::Hz), (0.1, FrequencyUnit::Hz));
        let (v, u) = normalize_modulation_frequency(2500.0, FrequencyUnit::Hz);
        assert!(approx(v, 2.5));
        assert_eq!(u, FrequencyUnit::KHz);

        let (v, u) = normalize_modulation_frequency(12000.0, FrequencyUnit::KHz);
        assert!(approx(v, 12.0));
        assert_eq!(u, FrequencyUnit::MHz);
        let (v, u) = normalize_modulation_frequency(0.05, FrequencyUnit::KHz);
        assert!(approx(v, 50.0));
        assert_eq!(u, FrequencyUnit::Hz);

        assert_eq!(normalize_modulation_frequency(25.0, FrequencyUnit::MHz), (20.0, FrequencyUnit::MHz));
        let (v, u) = normalize_modulation_frequency(0.05, FrequencyUnit::MHz);
        assert!(approx(v, 50.0));
        assert_eq!(u, FrequencyUnit::KHz);

        assert_eq!(normalize_modulation_frequency(3.0, FrequencyUnit::GHz), (1.0, FrequencyUnit::KHz));
    }

    #[test]
    fn test_carrier_clamp() {
        assert_eq!(clamp_carrier(7000.0, FrequencyUnit::MHz), 6000.0);
        assert_eq!(clamp_carrier(10.0, FrequencyUnit::KHz), 100.0);
        assert_eq!(clamp_carrier(915.0, FrequencyUnit::MHz), 915.0);
    }

    #[test]
    fn test_display_scaling() {
        assert_eq!(display_frequency(500_000.0), (500.0, FrequencyUnit::KHz));
        assert_eq!(display_frequency(915e6), (915.0, FrequencyUnit::MHz));
        assert_eq!(display_frequency(2.4e9), (2.4, FrequencyUnit::GHz));
    }

    #[test]
    fn test_unit_conversion_to_mhz() {
        assert!(approx(FrequencyUnit::GHz.to_mhz(2.4), 2400.0));
        assert!(approx(FrequencyUnit::KHz.to_mhz(500.0), 0.5));
        assert!(approx(FrequencyUnit::Hz.to_mhz(1e6), 1.0));
    }

    #[test]
    fn test_dwell_units() {
        assert_eq!(TimeUnit::Millisecond.to_duration(100.0).unwrap(), Duration::from_millis(100));
        assert_eq!(TimeUnit::Second.to_duration(2.0).unwrap(), Duration::from_secs(2));
        // microsecond dwell has a floor
        let floor = TimeUnit::Microsecond.to_duration(0.5).unwrap();
        assert!(floor >= Duration::from_nanos(1049) && floor <= Duration::from_nanos(1050));
        assert!(TimeUnit::Second.to_duration(-1.0).is_err());
        assert!(TimeUnit::Second.to_duration(f64::NAN).is_err());
    }

    #[test]
    fn test_parse_units() {
        assert_eq!("kHz".parse::<FrequencyUnit>().unwrap(), FrequencyUnit::KHz);
        assert_eq!("μs".parse::<TimeUnit>().unwrap(), TimeUnit::Microsecond);
        assert!("furlong".parse::<FrequencyUnit>().is_err());
    }
}
