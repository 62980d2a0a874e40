use std::sync::Arc;

use tracing::debug;

use crate::controllers::CommandSink;
use crate::protocol::{
    clamp_carrier, normalize_frequency, normalize_modulation_frequency, Command, FrequencyUnit, ModulationKind,
};

// AM internal rate limits, kHz
const AM_RATE_MIN_KHZ: f64 = 0.0001;
const AM_RATE_MAX_KHZ: f64 = 20_000.0;

/// Typed front end over the command queue. Nothing is cached here: the
/// instrument's readbacks on the event bus are the only source of truth.
#[derive(Clone)]
pub struct GeneratorClient {
    sink: Arc<dyn CommandSink>,
}

impl GeneratorClient {
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self { sink }
    }

    fn send(&self, command: Command) {
        debug!(%command, "enqueue");
        self.sink.enqueue(command);
    }

    pub fn identify(&self) {
        self.send(Command::identify());
    }

    pub fn clear_errors(&self) {
        self.send(Command::clear_status());
    }

    pub fn set_rf_output(&self, on: bool) {
        self.send(Command::rf_output(on));
    }

    /// Carrier frequency, held inside the instrument's range.
    pub fn set_frequency(&self, value: f64, unit: FrequencyUnit) {
        self.send(Command::frequency(clamp_carrier(value, unit), unit));
    }

    /// Carrier as typed by an operator: re-expressed on the unit ladder
    /// first, then clamped like any other carrier set.
    pub fn enter_frequency(&self, value: f64, unit: FrequencyUnit) {
        let (value, unit) = normalize_frequency(value, unit);
        self.set_frequency(value, unit);
    }

    pub fn set_power(&self, dbm: f64) {
        self.send(Command::power(dbm));
    }

    pub fn set_modulation_state(&self, on: bool) {
        self.send(Command::modulation_state(on));
    }

    /// Only one modulation kind is active at a time: the other two are
    /// switched off before `kind` is switched on.
    pub fn set_modulation_type(&self, kind: ModulationKind) {
        for other in ModulationKind::ALL.into_iter().filter(|k| *k != kind) {
            self.send(Command::modulation_enable(other, false));
        }
        self.send(Command::modulation_enable(kind, true));
    }

    pub fn set_modulation_enabled(&self, kind: ModulationKind, on: bool) {
        self.send(Command::modulation_enable(kind, on));
    }

    pub fn set_source(&self, kind: ModulationKind, internal: bool) {
        self.send(Command::source(kind, internal));
    }

    pub fn set_coupling(&self, kind: ModulationKind, dc: bool) {
        self.send(Command::coupling(kind, dc));
    }

    pub fn set_modulation_frequency(&self, kind: ModulationKind, value: f64, unit: FrequencyUnit) {
        let (value, unit) = match kind {
            ModulationKind::Am => {
                let khz = unit.to_hz(value) / 1e3;
                (khz.clamp(AM_RATE_MIN_KHZ, AM_RATE_MAX_KHZ), FrequencyUnit::KHz)
            }
            _ => (value, unit),
        };
        self.send(Command::modulation_frequency(kind, value, unit));
    }

    /// Modulation rate as typed by an operator.
    pub fn enter_modulation_frequency(&self, kind: ModulationKind, value: f64, unit: FrequencyUnit) {
        let (value, unit) = normalize_modulation_frequency(value, unit);
        self.set_modulation_frequency(kind, value, unit);
    }

    pub fn set_am_type(&self, linear: bool) {
        self.send(Command::am_type(linear));
    }

    pub fn set_am_mode(&self, normal: bool) {
        self.send(Command::am_mode(normal));
    }

    pub fn set_am_linear_depth(&self, percent: f64) {
        self.send(Command::am_linear_depth(percent));
    }

    pub fn set_am_exp_depth(&self, db: f64) {
        self.send(Command::am_exp_depth(db));
    }

    pub fn set_fm_deviation(&self, hz: f64) {
        self.send(Command::fm_deviation(hz));
    }

    pub fn set_pm_deviation(&self, radians: f64) {
        self.send(Command::pm_deviation(radians));
    }

    pub fn set_pm_bandwidth(&self, normal: bool) {
        self.send(Command::pm_bandwidth(normal));
    }
}
