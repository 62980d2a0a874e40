/******************** Configuration ********************/

// instrument limits, defaults and the optional settings file.
// settings are read once at start-up; nothing is written back.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::detection::PollerOptions;
use crate::error::{ConfigurationError, Error, Result};
use crate::protocol::{FrequencyUnit, ModulationKind, TimeUnit};
use crate::regulation::PidGains;
use crate::sweep::{Spacing, SweepSpec};

pub const INSTRUMENT_IP: &str = "192.168.100.79";
pub const SCPI_PORT: u16 = 5025;
pub const IO_TIMEOUT_MS: u64 = 2000;

pub const DETECTION_RETRIES: u32 = 4;
pub const PING_TIMEOUT_MS: u64 = 500;
pub const PING_INTERVAL_MS: u64 = 250;

// output power the regulation loop may command, dBm
pub const POWER_MIN_DBM: f64 = -110.0;
pub const POWER_MAX_DBM: f64 = 14.0;

pub const DEFAULT_KP: f64 = 1.0;
pub const DEFAULT_KI: f64 = 1.0;
pub const DEFAULT_KD: f64 = 0.5;

pub const SWEEP_START_MHZ: f64 = 100.0;
pub const SWEEP_STOP_MHZ: f64 = 6000.0;
pub const SWEEP_STEPS: u32 = 100;
pub const SWEEP_DWELL_MS: f64 = 100.0;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct InstrumentSettings {
    pub address: String,
    pub port: u16,
    /// Applies to connect, every write and every query.
    pub io_timeout_ms: u64,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            address: INSTRUMENT_IP.to_string(),
            port: SCPI_PORT,
            io_timeout_ms: IO_TIMEOUT_MS,
        }
    }
}

impl InstrumentSettings {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionSettings {
    pub retries: u32,
    pub ping_timeout_ms: u64,
    pub interval_ms: u64,
    /// Start over automatically after a clean "not found".
    pub auto_retry: bool,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            retries: DETECTION_RETRIES,
            ping_timeout_ms: PING_TIMEOUT_MS,
            interval_ms: PING_INTERVAL_MS,
            auto_retry: true,
        }
    }
}

impl DetectionSettings {
    pub fn poller_options(&self) -> PollerOptions {
        PollerOptions {
            retries: self.retries,
            timeout: Duration::from_millis(self.ping_timeout_ms),
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegulationSettings {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub power_min_dbm: f64,
    pub power_max_dbm: f64,
}

impl Default for RegulationSettings {
    fn default() -> Self {
        Self {
            kp: DEFAULT_KP,
            ki: DEFAULT_KI,
            kd: DEFAULT_KD,
            power_min_dbm: POWER_MIN_DBM,
            power_max_dbm: POWER_MAX_DBM,
        }
    }
}

impl RegulationSettings {
    pub fn gains(&self) -> PidGains {
        PidGains {
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweepSettings {
    pub start: f64,
    pub stop: f64,
    pub unit: FrequencyUnit,
    pub steps: u32,
    pub dwell: f64,
    pub dwell_unit: TimeUnit,
    pub spacing: Spacing,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            start: SWEEP_START_MHZ,
            stop: SWEEP_STOP_MHZ,
            unit: FrequencyUnit::MHz,
            steps: SWEEP_STEPS,
            dwell: SWEEP_DWELL_MS,
            dwell_unit: TimeUnit::Millisecond,
            spacing: Spacing::Linear,
        }
    }
}

impl SweepSettings {
    pub fn spec(&self) -> std::result::Result<SweepSpec, ConfigurationError> {
        SweepSpec::from_units(
            self.start,
            self.unit,
            self.stop,
            self.unit,
            self.steps,
            self.dwell,
            self.dwell_unit,
            self.spacing,
        )
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub instrument: InstrumentSettings,
    pub detection: DetectionSettings,
    pub regulation: RegulationSettings,
    pub sweep: SweepSettings,
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            instrument: InstrumentSettings::default(),
            detection: DetectionSettings::default(),
            regulation: RegulationSettings::default(),
            sweep: SweepSettings::default(),
            event_capacity: crate::events::DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(Error::SettingsIo)?;
        let settings = Self::from_toml_str(&text)?;
        info!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        if self.instrument.io_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "instrument.io_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.detection.retries == 0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "detection.retries",
                reason: "must be at least 1".into(),
            });
        }
        if self.detection.ping_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "detection.ping_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        let r = &self.regulation;
        if !(r.power_min_dbm < r.power_max_dbm) {
            return Err(ConfigurationError::InvalidSetting {
                field: "regulation.power_min_dbm",
                reason: format!("{} is not below {}", r.power_min_dbm, r.power_max_dbm),
            });
        }
        if ![r.kp, r.ki, r.kd].iter().all(|g| g.is_finite()) {
            return Err(ConfigurationError::InvalidSetting {
                field: "regulation",
                reason: "gains must be finite".into(),
            });
        }
        Ok(())
    }
}

/// Operator-facing mode flags, owned by the coordinator and handed by
/// reference to whatever needs them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControlState {
    pub detected: bool,
    pub connected: bool,
    pub identity: Option<String>,
    pub rf_on: bool,
    pub sweep_enabled: bool,
    pub sweep_running: bool,
    pub sweep: Option<SweepSpec>,
    pub modulation: Option<ModulationKind>,
    pub modulation_on: bool,
    /// Set once the operator has been told the generator is missing.
    pub alerted: bool,
    pub last_error: Option<String>,
}
