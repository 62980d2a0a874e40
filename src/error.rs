/******************** Error Module ********************/

// error taxonomy shared by the dispatcher, sweep, poller and regulation loop.
// nothing in here terminates the process: workers log these and publish a
// message on the event bus instead.

use std::io;

use thiserror::Error;

/// The transport session could not be opened.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not resolve instrument address {0}")]
    Resolve(String),

    #[error("connection to {address} failed: {source}")]
    Io {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// A write or query failed mid-session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out waiting for the instrument")]
    Timeout,

    #[error("connection closed by the instrument")]
    Closed,
}

impl TransportError {
    /// Maps an I/O error onto the transport taxonomy, folding socket
    /// timeouts into [`TransportError::Timeout`].
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(err),
        }
    }
}

/// The instrument answered with text we could not decode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceProtocolError {
    #[error("empty response to {query}")]
    EmptyResponse { query: String },

    #[error("response to {query} is not a number: {text:?}")]
    BadNumber { query: String, text: String },

    #[error("response to {query} is not a recognised token: {text:?}")]
    UnknownToken { query: String, text: String },
}

/// Invalid parameters rejected before any thread is spawned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("logarithmic sweep needs at least 2 steps, got {0}")]
    TooFewLogSteps(u32),

    #[error("sweep needs at least 1 step")]
    ZeroSteps,

    #[error("logarithmic sweep cannot start at {0}")]
    NonPositiveLogStart(f64),

    #[error("sweep stop {stop} is below start {start}")]
    InvertedRange { start: f64, stop: f64 },

    #[error("sweep value is not finite")]
    NotFinite,

    #[error("a sweep is already running")]
    SweepActive,

    #[error("detection is already running")]
    DetectionActive,

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

/// A reachability attempt raised instead of timing out.
#[derive(Debug, Error)]
#[error("network error while pinging {host}: {source}")]
pub struct NetworkError {
    pub host: String,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("dispatcher has been stopped")]
    Stopped,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] DeviceProtocolError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),

    #[error("failed to read settings file: {0}")]
    SettingsIo(#[source] io::Error),

    #[error("failed to parse settings file: {0}")]
    SettingsParse(#[from] toml::de::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
