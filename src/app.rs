/******************** Coordinator ********************/

// wires detection, the dispatcher, the sweep and the regulation loop
// together and owns the operator-facing ControlState. device workers never
// call each other; they publish events and the pump below reacts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

use crate::config::{ControlState, Settings};
use crate::controllers::{CommandSink, GeneratorClient};
use crate::detection::{Pinger, ReachabilityPoller, ReachabilityState};
use crate::drivers::generator::{Dispatcher, Transport};
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::probe::{FieldProbeListener, FieldSample};
use crate::protocol::Command;
use crate::regulation::{ControlMode, PowerLimits, RegulationLoop};
use crate::sweep::{SweepEngine, SweepSpec};
use crate::utilities::{host_of, instrument_address, open_instrument};

// The dispatcher only exists once an instrument is connected; producers are
// handed this link so they can be built before that.
#[derive(Default)]
struct InstrumentLink {
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl InstrumentLink {
    fn current(&self) -> Option<Dispatcher> {
        self.dispatcher.lock().clone()
    }
}

impl CommandSink for InstrumentLink {
    fn enqueue(&self, command: Command) {
        match self.current() {
            Some(dispatcher) => dispatcher.enqueue(command),
            None => warn!(%command, "no instrument connected, dropping command"),
        }
    }
}

pub struct App {
    settings: Settings,
    address: String,
    events: EventBus,
    transport: Arc<dyn Transport>,
    link: Arc<InstrumentLink>,
    client: GeneratorClient,
    sweep: SweepEngine,
    poller: ReachabilityPoller,
    regulation: RegulationLoop,
    state: Mutex<ControlState>,
    closing: AtomicBool,
    pump_stop: Notify,
}

impl App {
    pub fn new(settings: Settings, transport: Arc<dyn Transport>, pinger: Arc<dyn Pinger>) -> Self {
        let events = EventBus::new(settings.event_capacity);
        let link = Arc::new(InstrumentLink::default());
        let address = instrument_address(&settings.instrument.address, settings.instrument.port);

        let limits = PowerLimits {
            min_dbm: settings.regulation.power_min_dbm,
            max_dbm: settings.regulation.power_max_dbm,
        };
        let regulation = RegulationLoop::new(settings.regulation.gains(), limits, link.clone(), events.clone());
        let poller = ReachabilityPoller::new(pinger, settings.detection.poller_options(), events.clone());

        Self {
            client: GeneratorClient::new(link.clone()),
            address,
            events,
            transport,
            link,
            sweep: SweepEngine::new(),
            poller,
            regulation,
            state: Mutex::new(ControlState::default()),
            closing: AtomicBool::new(false),
            pump_stop: Notify::new(),
            settings,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn client(&self) -> &GeneratorClient {
        &self.client
    }

    pub fn regulation(&self) -> &RegulationLoop {
        &self.regulation
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> ControlState {
        self.state.lock().clone()
    }

    pub fn reachability(&self) -> ReachabilityState {
        self.poller.state()
    }

    pub fn sweep_running(&self) -> bool {
        self.sweep.is_running()
    }

    /// Starts looking for the instrument. Connection follows detection.
    pub fn start(&self) -> Result<()> {
        self.poller.start_detection(host_of(&self.address))
    }

    /// Opens the instrument session and asks it to identify itself.
    pub fn connect(&self) -> Result<()> {
        if self.link.current().is_some() {
            debug!("already connected");
            return Ok(());
        }
        match open_instrument(self.transport.as_ref(), &self.address, self.events.clone()) {
            Ok(dispatcher) => {
                *self.link.dispatcher.lock() = Some(dispatcher);
                self.state.lock().connected = true;
                self.client.identify();
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.state.lock().last_error = Some(message.clone());
                self.events.publish(Event::Error(message));
                Err(e)
            }
        }
    }

    /// Sweep runs whenever RF output comes on while this is set.
    pub fn enable_sweep(&self, spec: Option<SweepSpec>) {
        let disable = {
            let mut s = self.state.lock();
            s.sweep_enabled = spec.is_some();
            s.sweep = spec;
            !s.sweep_enabled
        };
        if disable && self.sweep.is_running() {
            self.sweep.stop_sweep();
            self.state.lock().sweep_running = false;
        }
    }

    pub fn set_control_mode(&self, mode: ControlMode) -> f64 {
        self.regulation.set_mode(mode)
    }

    pub fn set_target(&self, value: f64) {
        self.regulation.set_target(value);
    }

    /// Blocks until every command issued so far has reached the instrument.
    pub fn flush(&self) {
        if let Some(dispatcher) = self.link.current() {
            dispatcher.flush();
        }
    }

    pub fn handle_event(&self, event: &Event) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        match event {
            Event::InstrumentDetected(true) => {
                self.state.lock().detected = true;
                self.poller.stop_detection();
                if let Err(e) = self.connect() {
                    error!("could not connect after detection: {}", e);
                }
            }
            Event::InstrumentDetected(false) | Event::NetworkError(_) => {
                let first = {
                    let mut s = self.state.lock();
                    s.detected = false;
                    if let Event::NetworkError(msg) = event {
                        s.last_error = Some(msg.clone());
                    }
                    !std::mem::replace(&mut s.alerted, true)
                };
                if first {
                    warn!(address = %self.address, "signal generator not found, check the LAN connection");
                }
                if self.settings.detection.auto_retry {
                    if let Err(e) = self.poller.retry() {
                        error!("detection retry failed: {}", e);
                    }
                }
            }
            Event::InstrumentConnected(identity) => {
                info!(%identity, "instrument identified");
                self.state.lock().identity = Some(identity.clone());
            }
            Event::RfOutSet(on) => self.on_rf_output(*on),
            Event::PowerSet(dbm) => self.regulation.set_output_power(*dbm),
            Event::SweepFinished => {
                self.state.lock().sweep_running = false;
                self.client.set_rf_output(false);
            }
            Event::ModulationStateSet(on) => self.state.lock().modulation_on = *on,
            Event::ModulationSubStateSet(kind, on) => {
                let mut s = self.state.lock();
                if *on {
                    s.modulation = Some(*kind);
                } else if s.modulation == Some(*kind) {
                    s.modulation = None;
                }
            }
            Event::TransportError(msg) | Event::Error(msg) | Event::ProbeError(msg) => {
                self.state.lock().last_error = Some(msg.clone());
            }
            _ => {}
        }
    }

    fn on_rf_output(&self, on: bool) {
        self.regulation.on_rf_output(on);
        let sweep = {
            let mut s = self.state.lock();
            s.rf_on = on;
            if on && s.sweep_enabled {
                s.sweep.clone()
            } else {
                None
            }
        };

        if on {
            if let Some(spec) = sweep {
                if self.sweep.is_running() {
                    return;
                }
                let sink: Arc<dyn CommandSink> = self.link.clone();
                match self.sweep.start_sweep(spec, sink, self.events.clone()) {
                    Ok(()) => self.state.lock().sweep_running = true,
                    Err(e) => {
                        error!("sweep did not start: {}", e);
                        self.events.publish(Event::Error(e.to_string()));
                    }
                }
            }
        } else if self.sweep.is_running() {
            self.sweep.stop_sweep();
            self.state.lock().sweep_running = false;
        }
    }

    /// Feeds bus events to `handle_event`, one at a time and in order, until
    /// `shutdown` is called.
    pub fn spawn_event_pump(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let app = Arc::clone(self);
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(event) => {
                            let worker = Arc::clone(&app);
                            // handlers may join worker threads
                            let handled = tokio::task::spawn_blocking(move || worker.handle_event(&event)).await;
                            if let Err(e) = handled {
                                error!("event handler failed: {}", e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "event pump fell behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = app.pump_stop.notified() => break,
                }
            }
            debug!("event pump stopped");
        })
    }

    /// RF off, then tear everything down. Commands still queued behind the
    /// RF-off are dropped. Blocks; call from a plain thread.
    pub fn shutdown(&self) {
        info!("shutting down");
        self.closing.store(true, Ordering::Release);
        self.pump_stop.notify_one();
        self.sweep.stop_sweep();
        self.poller.stop_detection();

        let dispatcher = self.link.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.discard_pending();
            dispatcher.enqueue(Command::rf_output(false));
            dispatcher.flush();
            dispatcher.stop();
        }

        let mut s = self.state.lock();
        s.connected = false;
        s.sweep_running = false;
    }
}

impl FieldProbeListener for App {
    fn on_field_intensity(&self, sample: FieldSample) {
        self.regulation.on_field_intensity(sample);
    }

    fn on_battery(&self, percent: u8) {
        self.events.publish(Event::ProbeBattery(percent));
    }

    fn on_temperature(&self, value: f64) {
        self.events.publish(Event::ProbeTemperature(value));
    }

    fn on_identity(&self, model: &str, revision: &str, serial: &str) {
        self.events.publish(Event::ProbeIdentified {
            model: model.to_string(),
            revision: revision.to_string(),
            serial: serial.to_string(),
        });
    }

    fn on_serial_error(&self, message: &str) {
        warn!("probe serial error: {}", message);
        self.events.publish(Event::ProbeError(message.to_string()));
    }

    fn on_probe_error(&self, message: &str) {
        warn!("probe error: {}", message);
        self.events.publish(Event::ProbeError(message.to_string()));
    }
}
