pub mod config;

pub use config::{ControlState, Settings};
