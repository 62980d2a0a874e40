pub mod client;
pub mod mock;

pub use client::GeneratorClient;
pub use mock::{MockSignalGenerator, MOCK_IDENTITY};
