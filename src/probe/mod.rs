/****************    Field Probe interface   *************/

// the probe driver lives outside this crate. it pushes samples and status
// through these callbacks on its own thread, at its own cadence.

/// One field-intensity reading in V/m.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FieldSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub composite: f64,
}

impl FieldSample {
    pub fn new(x: f64, y: f64, z: f64, composite: f64) -> Self {
        Self { x, y, z, composite }
    }
}

/// Callbacks a field-probe driver delivers. Only the intensity callback is
/// required; the rest default to doing nothing.
pub trait FieldProbeListener: Send + Sync {
    fn on_field_intensity(&self, sample: FieldSample);

    fn on_battery(&self, _percent: u8) {}

    fn on_temperature(&self, _value: f64) {}

    fn on_identity(&self, _model: &str, _revision: &str, _serial: &str) {}

    fn on_serial_error(&self, _message: &str) {}

    fn on_probe_error(&self, _message: &str) {}
}
