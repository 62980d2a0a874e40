pub mod utils;

pub use utils::{host_of, instrument_address, open_instrument};
