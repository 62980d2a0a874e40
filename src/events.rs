/******************** Events Module ********************/

// every worker publishes what it learns here; UI, automation and the
// coordinator subscribe. publishing never blocks and never fails when
// nobody is listening.

use tokio::sync::broadcast;
use tracing::trace;

use crate::probe::FieldSample;
use crate::protocol::ModulationKind;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Reachability outcome; `false` is a clean "not found".
    InstrumentDetected(bool),
    /// Reachability retries exhausted while pings were raising.
    NetworkError(String),
    InstrumentConnected(String),

    /// Carrier frequency readback in Hz.
    FrequencySet(f64),
    /// Output power readback in dBm.
    PowerSet(f64),
    RfOutSet(bool),

    SweepProgress(f64),
    SweepFinished,

    ModulationStateSet(bool),
    ModulationSubStateSet(ModulationKind, bool),
    /// `true` when the source is internal.
    ModulationSourceSet(ModulationKind, bool),
    ModulationFrequencySet(ModulationKind, f64),
    /// `true` when the external coupling is DC.
    ModulationCouplingSet(ModulationKind, bool),
    /// `true` for normal mode (AM) or normal bandwidth (PM).
    ModulationModeSet(ModulationKind, bool),
    ModulationDeviationSet(ModulationKind, f64),
    /// `true` when AM is linear.
    AmTypeSet(bool),
    AmDepthSet(f64),

    FieldIntensity(FieldSample),
    ProbeBattery(u8),
    ProbeTemperature(f64),
    ProbeIdentified {
        model: String,
        revision: String,
        serial: String,
    },
    ProbeError(String),

    /// A write or query failed mid-session; reconnecting is up to the caller.
    TransportError(String),
    Error(String),
}

#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        trace!(?event, "publish");
        // no subscribers is not an error
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
