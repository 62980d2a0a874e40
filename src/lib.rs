/******************** Field Intensity Regulator ********************/

// drives a LAN signal generator and a field probe to hold a target field
// strength (closed loop) or a fixed output power, optionally while sweeping
// frequency. every command to the instrument goes through one ordered queue.

// module declaration
pub mod app;
pub mod config;
pub mod controllers;
pub mod detection;
pub mod drivers;
pub mod error;
pub mod events;
pub mod probe;
pub mod protocol;
pub mod regulation;
pub mod sweep;
pub mod utilities;

pub use app::App;
pub use config::{ControlState, Settings};
pub use error::{Error, Result};
pub use events::{Event, EventBus};
