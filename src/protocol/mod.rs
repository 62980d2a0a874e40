pub mod scpi;
pub mod units;

pub use scpi::{decode, Command, Header, ModulationKind, Payload, Reading, Response, Token, OPERATION_COMPLETE};
pub use units::{
    clamp_carrier, display_frequency, normalize_frequency, normalize_modulation_frequency, FrequencyUnit,
    TimeUnit,
};
