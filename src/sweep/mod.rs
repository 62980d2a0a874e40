pub mod task;
pub mod types;

pub use task::SweepEngine;
pub use types::{default_log_step_count, Spacing, SweepSpec};
