//! Field-strength regulation loop.
//!
//! Every probe sample is published for display. When the loop is in
//! closed-loop mode and RF output is on, the sample also drives the PID and
//! the clamped result goes out as a power command through the same queue
//! every other producer uses.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::config::{POWER_MAX_DBM, POWER_MIN_DBM};
use crate::controllers::CommandSink;
use crate::events::{Event, EventBus};
use crate::probe::FieldSample;
use crate::protocol::Command;
use crate::regulation::pid::{PidController, PidGains};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Hold a target field strength (V/m) by adjusting power.
    ClosedLoop,
    /// Hold a fixed output power (dBm).
    StaticPower,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerLimits {
    pub min_dbm: f64,
    pub max_dbm: f64,
}

impl Default for PowerLimits {
    fn default() -> Self {
        Self {
            min_dbm: POWER_MIN_DBM,
            max_dbm: POWER_MAX_DBM,
        }
    }
}

impl PowerLimits {
    pub fn clamp(&self, dbm: f64) -> f64 {
        clamp_power(dbm, self.min_dbm, self.max_dbm)
    }
}

pub fn clamp_power(dbm: f64, min: f64, max: f64) -> f64 {
    dbm.max(min).min(max)
}

#[derive(Debug)]
struct LoopState {
    pid: PidController,
    mode: ControlMode,
    rf_on: bool,
    measured_field: f64,
    target_field: f64,
    output_power: f64,
}

impl LoopState {
    // restart the regulator from the latest readings so the next output
    // has no stale integral or derivative behind it
    fn reseed(&mut self) {
        self.pid.clear();
        self.pid.set_measured(self.measured_field);
        self.pid.set_target(self.target_field);
    }
}

pub struct RegulationLoop {
    state: Mutex<LoopState>,
    limits: PowerLimits,
    sink: Arc<dyn CommandSink>,
    events: EventBus,
}

impl RegulationLoop {
    pub fn new(gains: PidGains, limits: PowerLimits, sink: Arc<dyn CommandSink>, events: EventBus) -> Self {
        Self {
            state: Mutex::new(LoopState {
                pid: PidController::new(gains),
                mode: ControlMode::ClosedLoop,
                rf_on: false,
                measured_field: 0.0,
                target_field: 0.0,
                output_power: 0.0,
            }),
            limits,
            sink,
            events,
        }
    }

    /// Feeds one probe sample. Returns the power that was commanded, if any.
    pub fn on_field_intensity(&self, sample: FieldSample) -> Option<f64> {
        self.events.publish(Event::FieldIntensity(sample));

        let power = {
            let mut s = self.state.lock();
            s.measured_field = sample.composite;
            if s.mode != ControlMode::ClosedLoop || !s.rf_on {
                return None;
            }
            s.pid.set_measured(sample.composite);
            let raw = s.pid.calculate();
            if !raw.is_finite() {
                warn!(raw, composite = sample.composite, "regulator produced a non-finite output");
                return None;
            }
            let power = self.limits.clamp(raw);
            debug!(raw, power, composite = sample.composite, target = s.target_field, "regulation step");
            power
        };

        self.sink.enqueue(Command::power(power));
        Some(power)
    }

    /// Switches control mode and returns the setpoint the operator should now
    /// see: the current field for closed-loop, the current power for static.
    pub fn set_mode(&self, mode: ControlMode) -> f64 {
        let mut s = self.state.lock();
        s.mode = mode;
        match mode {
            ControlMode::ClosedLoop => {
                s.target_field = s.measured_field;
                s.reseed();
                s.target_field
            }
            ControlMode::StaticPower => {
                s.pid.clear();
                s.output_power
            }
        }
    }

    /// A field target in closed-loop mode, an output power in static mode.
    pub fn set_target(&self, value: f64) {
        let mode = {
            let mut s = self.state.lock();
            if s.mode == ControlMode::ClosedLoop {
                s.target_field = value;
                s.pid.set_target(value);
            }
            s.mode
        };
        if mode == ControlMode::StaticPower {
            self.sink.enqueue(Command::power(value));
        }
    }

    pub fn on_rf_output(&self, on: bool) {
        let mut s = self.state.lock();
        s.rf_on = on;
        s.reseed();
    }

    /// Records the power the instrument reports it is producing.
    pub fn set_output_power(&self, dbm: f64) {
        self.state.lock().output_power = dbm;
    }

    pub fn mode(&self) -> ControlMode {
        self.state.lock().mode
    }

    pub fn rf_on(&self) -> bool {
        self.state.lock().rf_on
    }

    pub fn target_field(&self) -> f64 {
        self.state.lock().target_field
    }

    pub fn measured_field(&self) -> f64 {
        self.state.lock().measured_field
    }

    pub fn output_power(&self) -> f64 {
        self.state.lock().output_power
    }

    pub fn limits(&self) -> PowerLimits {
        self.limits
    }
}
