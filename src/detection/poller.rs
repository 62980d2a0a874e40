/**
 * Reachability poller
 *
 * One thread pings the instrument host until it answers or the retry budget
 * runs out. An answer publishes `InstrumentDetected(true)` and ends the
 * thread. An exhausted budget publishes `InstrumentDetected(false)`, or
 * `NetworkError` when the last attempt raised instead of timing out, and the
 * thread parks until `retry()` refills the budget or `stop_detection()`.
 */

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::config::{DETECTION_RETRIES, PING_INTERVAL_MS, PING_TIMEOUT_MS};
use crate::error::{ConfigurationError, DispatcherError, Error, NetworkError, Result};
use crate::events::{Event, EventBus};

/// One reachability probe. `Ok(Some(rtt))` means the host answered,
/// `Ok(None)` means it did not answer in time, `Err` means the attempt
/// itself failed (unresolvable host, no route).
pub trait Pinger: Send + Sync {
    fn ping(&self, host: &str, timeout: Duration) -> io::Result<Option<Duration>>;
}

impl<F> Pinger for F
where
    F: Fn(&str, Duration) -> io::Result<Option<Duration>> + Send + Sync,
{
    fn ping(&self, host: &str, timeout: Duration) -> io::Result<Option<Duration>> {
        self(host, timeout)
    }
}

/// TCP connect probe against the instrument's control port. ICMP needs raw
/// sockets, so a refused connection also counts as the host being up.
pub struct TcpPinger {
    port: u16,
}

impl TcpPinger {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Pinger for TcpPinger {
    fn ping(&self, host: &str, timeout: Duration) -> io::Result<Option<Duration>> {
        let addr = (host, self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} did not resolve", host)))?;

        let sent = Instant::now();
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => Ok(Some(sent.elapsed())),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(Some(sent.elapsed())),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollerOptions {
    pub retries: u32,
    pub timeout: Duration,
    /// Pause between failed attempts.
    pub interval: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            retries: DETECTION_RETRIES,
            timeout: Duration::from_millis(PING_TIMEOUT_MS),
            interval: Duration::from_millis(PING_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReachabilityState {
    pub remaining_retries: u32,
    pub detected: bool,
}

#[derive(Debug, Default)]
struct PollState {
    started: bool,
    remaining: u32,
    detected: bool,
    host: String,
}

#[derive(Default)]
struct PollShared {
    state: Mutex<PollState>,
    wake: Condvar,
}

pub struct ReachabilityPoller {
    shared: Arc<PollShared>,
    pinger: Arc<dyn Pinger>,
    options: PollerOptions,
    events: EventBus,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReachabilityPoller {
    pub fn new(pinger: Arc<dyn Pinger>, options: PollerOptions, events: EventBus) -> Self {
        Self {
            shared: Arc::new(PollShared::default()),
            pinger,
            options,
            events,
            worker: Mutex::new(None),
        }
    }

    pub fn start_detection(&self, host: &str) -> Result<()> {
        let mut worker = self.worker.lock();
        {
            let mut s = self.shared.state.lock();
            if s.started {
                return Err(ConfigurationError::DetectionActive.into());
            }
            s.started = true;
            s.detected = false;
            s.remaining = self.options.retries;
            s.host = host.to_string();
        }
        if let Some(done) = worker.take() {
            let _ = done.join();
        }

        info!(host, retries = self.options.retries, "detection started");
        let shared = Arc::clone(&self.shared);
        let pinger = Arc::clone(&self.pinger);
        let options = self.options;
        let events = self.events.clone();
        let spawned = thread::Builder::new()
            .name("detection".into())
            .spawn(move || poll_task(shared, pinger, options, events));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.state.lock().started = false;
                Err(Error::Dispatcher(DispatcherError::Spawn(e)))
            }
        }
    }

    /// Refills the retry budget and resumes polling. Restarts the thread
    /// against the last host if it already ended.
    pub fn retry(&self) -> Result<()> {
        let host = {
            let mut s = self.shared.state.lock();
            if s.started {
                s.remaining = self.options.retries;
                s.detected = false;
                self.shared.wake.notify_all();
                debug!(host = %s.host, "detection retry");
                return Ok(());
            }
            s.host.clone()
        };
        if host.is_empty() {
            warn!("retry requested before any detection was started");
            return Ok(());
        }
        self.start_detection(&host)
    }

    pub fn stop_detection(&self) {
        {
            let mut s = self.shared.state.lock();
            s.started = false;
            self.shared.wake.notify_all();
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("detection thread panicked");
            }
        }
    }

    pub fn state(&self) -> ReachabilityState {
        let s = self.shared.state.lock();
        ReachabilityState {
            remaining_retries: s.remaining,
            detected: s.detected,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().started
    }
}

impl Drop for ReachabilityPoller {
    fn drop(&mut self) {
        self.stop_detection();
    }
}

fn poll_task(shared: Arc<PollShared>, pinger: Arc<dyn Pinger>, options: PollerOptions, events: EventBus) {
    loop {
        let host = {
            let mut s = shared.state.lock();
            // parked after exhaustion until retry() or stop
            shared.wake.wait_while(&mut s, |s| s.started && s.remaining == 0);
            if !s.started {
                break;
            }
            s.host.clone()
        };

        let result = pinger.ping(&host, options.timeout);

        let mut s = shared.state.lock();
        if !s.started {
            break;
        }
        let failure = match result {
            Ok(Some(rtt)) => {
                s.detected = true;
                s.started = false;
                drop(s);
                info!(%host, ?rtt, "instrument detected");
                events.publish(Event::InstrumentDetected(true));
                break;
            }
            Ok(None) => {
                debug!(%host, remaining = s.remaining, "no answer");
                None
            }
            Err(source) => {
                debug!(%host, "ping failed: {}", source);
                Some(NetworkError { host: host.clone(), source })
            }
        };

        s.remaining = s.remaining.saturating_sub(1);
        if s.remaining == 0 {
            drop(s);
            match failure {
                Some(err) => {
                    warn!("{}", err);
                    events.publish(Event::NetworkError(err.to_string()));
                }
                None => {
                    warn!(%host, retries = options.retries, "instrument not found");
                    events.publish(Event::InstrumentDetected(false));
                }
            }
        } else {
            shared
                .wake
                .wait_while_for(&mut s, |s| s.started, options.interval);
        }
    }
    debug!("detection thread exiting");
}
