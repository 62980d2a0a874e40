use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::controllers::CommandSink;
use crate::error::{ConfigurationError, DispatcherError, Error, Result};
use crate::events::{Event, EventBus};
use crate::protocol::{Command, FrequencyUnit};
use crate::sweep::SweepSpec;

#[derive(Default)]
struct SweepFlag {
    running: Mutex<bool>,
    // wakes a dwelling sweep thread when the flag is cleared
    wake: Condvar,
}

/// Runs at most one frequency sweep at a time on its own thread.
#[derive(Default)]
pub struct SweepEngine {
    flag: Arc<SweepFlag>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SweepEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_sweep(&self, spec: SweepSpec, sink: Arc<dyn CommandSink>, events: EventBus) -> Result<()> {
        spec.validate()?;

        let mut worker = self.worker.lock();
        {
            let mut running = self.flag.running.lock();
            if *running {
                return Err(ConfigurationError::SweepActive.into());
            }
            *running = true;
        }
        // reap the previous, already finished, sweep
        if let Some(done) = worker.take() {
            let _ = done.join();
        }

        info!(
            start = spec.start,
            stop = spec.stop,
            steps = spec.steps,
            dwell = ?spec.dwell,
            spacing = ?spec.spacing,
            "sweep started"
        );
        let flag = Arc::clone(&self.flag);
        let spawned = thread::Builder::new()
            .name("sweep".into())
            .spawn(move || sweep_task(spec, flag, sink, events));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                *self.flag.running.lock() = false;
                Err(Error::Dispatcher(DispatcherError::Spawn(e)))
            }
        }
    }

    /// Clears the running flag and waits for the sweep thread to exit.
    /// No `SweepFinished` is published for a cancelled sweep.
    pub fn stop_sweep(&self) {
        {
            let mut running = self.flag.running.lock();
            *running = false;
            self.flag.wake.notify_all();
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("sweep thread panicked");
            }
            debug!("sweep thread joined");
        }
    }

    pub fn is_running(&self) -> bool {
        *self.flag.running.lock()
    }
}

impl Drop for SweepEngine {
    fn drop(&mut self) {
        self.stop_sweep();
    }
}

fn sweep_task(spec: SweepSpec, flag: Arc<SweepFlag>, sink: Arc<dyn CommandSink>, events: EventBus) {
    for frequency in spec.frequencies() {
        if !*flag.running.lock() {
            info!("sweep cancelled");
            return;
        }
        sink.enqueue(Command::frequency(frequency, FrequencyUnit::MHz));
        events.publish(Event::SweepProgress(spec.progress(frequency)));

        let mut running = flag.running.lock();
        if *running {
            let _ = flag.wake.wait_while_for(&mut running, |r| *r, spec.dwell);
        }
    }

    {
        let mut running = flag.running.lock();
        if !*running {
            info!("sweep cancelled");
            return;
        }
        *running = false;
    }
    info!("sweep finished");
    events.publish(Event::SweepFinished);
}
