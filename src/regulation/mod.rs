pub mod control;
pub mod pid;

pub use control::{clamp_power, ControlMode, PowerLimits, RegulationLoop};
pub use pid::{PidController, PidGains};
