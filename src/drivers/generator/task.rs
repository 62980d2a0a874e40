/**
 * Signal generator command dispatcher
 *
 * One worker thread owns the instrument session. Every producer (operator
 * controls, sweep, regulation loop) enqueues onto the same unbounded FIFO and
 * returns immediately; the worker drains it in order:
 *
 *   write command -> *OPC? -> state query -> decode -> publish readback
 *
 * Readbacks are what the instrument reports after the write, never the value
 * that was requested. A failed write or query is logged, published as
 * `Event::TransportError`, and the worker moves on to the next command.
 *
 * `flush` and `stop` block the caller, so call them from a plain thread (or
 * `spawn_blocking`), not from inside an async task.
 */

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::controllers::CommandSink;
use crate::drivers::generator::transport::{Session, Transport};
use crate::error::{DispatcherError, Error, Result};
use crate::events::{Event, EventBus};
use crate::protocol::{decode, Command, Header, Reading, OPERATION_COMPLETE};

enum Envelope {
    Command { command: Command, epoch: u64 },
    Flush(oneshot::Sender<()>),
    Exit,
}

#[derive(Default)]
struct Shared {
    // bumped by discard_pending; anything queued under an older epoch is skipped
    epoch: AtomicU64,
    stopped: AtomicBool,
}

#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
    shared: Arc<Shared>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Dispatcher {
    /// Opens a session on `address` and spawns the single worker that owns it.
    pub fn start(transport: &dyn Transport, address: &str, events: EventBus) -> Result<Self> {
        let session = transport.open(address)?;
        Self::with_session(session, events)
    }

    pub fn with_session(session: Box<dyn Session>, events: EventBus) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("scpi-dispatcher".into())
            .spawn(move || command_worker(session, rx, worker_shared, events))
            .map_err(DispatcherError::Spawn)?;

        info!("command dispatcher started");
        Ok(Self {
            tx,
            shared,
            worker: Arc::new(Mutex::new(Some(handle))),
        })
    }

    pub fn try_enqueue(&self, command: Command) -> Result<(), DispatcherError> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(DispatcherError::Stopped);
        }
        let epoch = self.shared.epoch.load(Ordering::Acquire);
        self.tx
            .send(Envelope::Command { command, epoch })
            .map_err(|_| DispatcherError::Stopped)
    }

    /// Blocks until every command enqueued before this call has been attempted.
    pub fn flush(&self) {
        if self.shared.stopped.load(Ordering::Acquire) {
            return;
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Envelope::Flush(done_tx)).is_err() {
            return;
        }
        // the worker dropping the sender (it exited) also releases us
        let _ = done_rx.blocking_recv();
    }

    /// Drops every command queued so far that the worker has not started.
    pub fn discard_pending(&self) {
        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(epoch, "discarding pending commands");
    }

    /// Queues the exit marker behind everything already enqueued, then joins
    /// the worker once those commands have been attempted. Enqueues after
    /// this call are dropped. Idempotent.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Envelope::Exit);

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                warn!("dispatcher stop called from its own worker, not joining");
                return;
            }
            if handle.join().is_err() {
                error!("dispatcher worker panicked");
            }
        }
        info!("command dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.shared.stopped.load(Ordering::Acquire)
            && self
                .worker
                .lock()
                .as_ref()
                .map_or(false, |handle| !handle.is_finished())
    }
}

impl CommandSink for Dispatcher {
    fn enqueue(&self, command: Command) {
        if let Err(e) = self.try_enqueue(command) {
            error!(%command, "dropping command: {}", e);
        }
    }
}

fn command_worker(
    mut session: Box<dyn Session>,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    shared: Arc<Shared>,
    events: EventBus,
) {
    while let Some(envelope) = rx.blocking_recv() {
        match envelope {
            Envelope::Exit => break,
            Envelope::Flush(done) => {
                let _ = done.send(());
            }
            Envelope::Command { command, epoch } => {
                if epoch < shared.epoch.load(Ordering::Acquire) {
                    debug!(%command, "skipping discarded command");
                    continue;
                }
                match round_trip(session.as_mut(), &command) {
                    Ok(Some(event)) => events.publish(event),
                    Ok(None) => {}
                    Err(Error::Protocol(e)) => {
                        warn!(%command, "unexpected readback: {}", e);
                        events.publish(Event::Error(e.to_string()));
                    }
                    Err(e) => {
                        error!(%command, "instrument I/O failed: {}", e);
                        events.publish(Event::TransportError(format!("{}: {}", command, e)));
                    }
                }
            }
        }
    }
    debug!("dispatcher worker exiting");
}

fn round_trip(session: &mut dyn Session, command: &Command) -> Result<Option<Event>> {
    if let Some(text) = command.encode() {
        debug!(command = %text, "write");
        session.write(&text)?;
        let complete = session.query(OPERATION_COMPLETE)?;
        if complete.trim() != "1" {
            debug!(response = %complete, "unexpected operation-complete response");
        }
    }

    let Some(query) = command.query() else {
        return Ok(None);
    };
    let response = session.query(&query)?;
    let reading = decode(command.header(), &response)?;
    Ok(readback_event(command.header(), reading))
}

/// Maps a decoded state query onto the event the rest of the system sees.
pub fn readback_event(header: Header, reading: Reading) -> Option<Event> {
    let kind = header.modulation_kind();
    let event = match (header, reading) {
        (Header::Identity, Reading::Text(idn)) => Event::InstrumentConnected(idn),
        (Header::RfOutput, Reading::Flag(on)) => Event::RfOutSet(on),
        (Header::Frequency, Reading::Number(hz)) => Event::FrequencySet(hz),
        (Header::Power, Reading::Number(dbm)) => Event::PowerSet(dbm),
        (Header::ModulationState, Reading::Flag(on)) => Event::ModulationStateSet(on),
        (Header::AmState | Header::FmState | Header::PmState, Reading::Flag(on)) => {
            Event::ModulationSubStateSet(kind?, on)
        }
        (Header::AmType, Reading::Flag(linear)) => Event::AmTypeSet(linear),
        (Header::AmMode | Header::PmBandwidth, Reading::Flag(normal)) => {
            Event::ModulationModeSet(kind?, normal)
        }
        (Header::AmSource | Header::FmSource | Header::PmSource, Reading::Flag(internal)) => {
            Event::ModulationSourceSet(kind?, internal)
        }
        (Header::AmCoupling | Header::FmCoupling | Header::PmCoupling, Reading::Flag(dc)) => {
            Event::ModulationCouplingSet(kind?, dc)
        }
        (Header::AmFrequency | Header::FmFrequency | Header::PmFrequency, Reading::Number(hz)) => {
            Event::ModulationFrequencySet(kind?, hz)
        }
        (Header::AmLinearDepth | Header::AmExpDepth, Reading::Number(depth)) => Event::AmDepthSet(depth),
        (Header::FmDeviation | Header::PmDeviation, Reading::Number(dev)) => {
            Event::ModulationDeviationSet(kind?, dev)
        }
        _ => return None,
    };
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::MockSignalGenerator;
    use crate::protocol::{FrequencyUnit, ModulationKind};
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(e) => out.push(e),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }

    fn start(mock: &MockSignalGenerator) -> (Dispatcher, EventBus) {
        let bus = EventBus::new(256);
        let dispatcher = Dispatcher::start(mock, "mock", bus.clone()).unwrap();
        (dispatcher, bus)
    }

    #[test]
    fn test_readback_event_mapping() {
        assert_eq!(
            readback_event(Header::FmSource, Reading::Flag(true)),
            Some(Event::ModulationSourceSet(ModulationKind::Fm, true))
        );
        assert_eq!(
            readback_event(Header::PmBandwidth, Reading::Flag(false)),
            Some(Event::ModulationModeSet(ModulationKind::Pm, false))
        );
        assert_eq!(readback_event(Header::AmExpDepth, Reading::Number(3.0)), Some(Event::AmDepthSet(3.0)));
        // mismatched reading shape yields nothing
        assert_eq!(readback_event(Header::Power, Reading::Flag(true)), None);
        assert_eq!(readback_event(Header::ClearStatus, Reading::Text(String::new())), None);
    }

    #[test]
    fn test_write_opc_then_state_query() {
        let mock = MockSignalGenerator::new();
        let (dispatcher, bus) = start(&mock);
        let mut rx = bus.subscribe();

        dispatcher.enqueue(Command::frequency(915.0, FrequencyUnit::MHz));
        dispatcher.flush();

        assert_eq!(mock.traffic(), vec![":FREQ 915 MHz", "*OPC?", ":FREQ?"]);
        assert_eq!(drain(&mut rx), vec![Event::FrequencySet(915e6)]);
        dispatcher.stop();
    }

    #[test]
    fn test_readback_is_instrument_value() {
        let mock = MockSignalGenerator::new();
        mock.override_power(Some(-3.5));
        let (dispatcher, bus) = start(&mock);
        let mut rx = bus.subscribe();

        dispatcher.enqueue(Command::power(10.0));
        dispatcher.flush();

        assert_eq!(drain(&mut rx), vec![Event::PowerSet(-3.5)]);
        dispatcher.stop();
    }

    #[test]
    fn test_transport_error_does_not_stop_worker() {
        let mock = MockSignalGenerator::new();
        let (dispatcher, bus) = start(&mock);
        let mut rx = bus.subscribe();

        mock.fail_next_queries(1);
        dispatcher.enqueue(Command::rf_output(true));
        dispatcher.enqueue(Command::rf_output(true));
        dispatcher.flush();

        let events = drain(&mut rx);
        assert!(matches!(events[0], Event::TransportError(_)));
        assert_eq!(events[1], Event::RfOutSet(true));
        assert!(dispatcher.is_running());
        dispatcher.stop();
    }

    #[test]
    fn test_garbled_readback_is_error_event() {
        let mock = MockSignalGenerator::new();
        mock.garble(Header::Power);
        let (dispatcher, bus) = start(&mock);
        let mut rx = bus.subscribe();

        dispatcher.enqueue(Command::power(1.0));
        dispatcher.flush();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Error(_)));
        dispatcher.stop();
    }

    #[test]
    fn test_identify_has_no_write() {
        let mock = MockSignalGenerator::new();
        let (dispatcher, bus) = start(&mock);
        let mut rx = bus.subscribe();

        dispatcher.enqueue(Command::identify());
        dispatcher.flush();

        assert_eq!(mock.traffic(), vec!["*IDN?"]);
        assert!(matches!(&drain(&mut rx)[..], [Event::InstrumentConnected(_)]));
        dispatcher.stop();
    }

    #[test]
    fn test_discard_pending_skips_queued() {
        let mock = MockSignalGenerator::new();
        mock.set_latency(Duration::from_millis(20));
        let (dispatcher, _bus) = start(&mock);

        for i in 0..20 {
            dispatcher.enqueue(Command::power(i as f64));
        }
        dispatcher.discard_pending();
        dispatcher.enqueue(Command::power(-1.0));
        dispatcher.flush();

        let writes = mock.writes();
        assert!(writes.len() < 21);
        assert_eq!(writes.last().map(String::as_str), Some(":POW -1 dBm"));
        dispatcher.stop();
    }

    #[test]
    fn test_stop_drains_queued_commands() {
        let mock = MockSignalGenerator::new();
        mock.set_latency(Duration::from_millis(5));
        let (dispatcher, _bus) = start(&mock);

        for i in 0..10 {
            dispatcher.enqueue(Command::power(i as f64));
        }
        dispatcher.stop();

        let expected: Vec<String> = (0..10).map(|i| format!(":POW {} dBm", i)).collect();
        assert_eq!(mock.writes(), expected);
        assert!(!dispatcher.is_running());
    }

    #[test]
    fn test_enqueue_after_stop_is_dropped() {
        let mock = MockSignalGenerator::new();
        let (dispatcher, _bus) = start(&mock);
        dispatcher.stop();
        assert!(!dispatcher.is_running());
        assert!(matches!(
            dispatcher.try_enqueue(Command::rf_output(false)),
            Err(DispatcherError::Stopped)
        ));
        // no panic, no hang
        dispatcher.enqueue(Command::rf_output(false));
        dispatcher.flush();
        dispatcher.stop();
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_refused_connection_is_error() {
        let mock = MockSignalGenerator::new();
        mock.refuse_connections(true);
        let err = Dispatcher::start(&mock, "mock", EventBus::default()).err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }
}
