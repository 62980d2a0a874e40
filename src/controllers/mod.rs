pub mod generator;

pub use generator::{GeneratorClient, MockSignalGenerator};

use crate::protocol::Command;

// Anything that accepts instrument commands without blocking the caller.
// The dispatcher is the real one; tests substitute recorders.
pub trait CommandSink: Send + Sync {
    // fire-and-forget: queue the command and return immediately
    fn enqueue(&self, command: Command);
}
