/*************** Program Entry Point *******************/

//
// finds the generator, connects, optionally sweeps or holds a power level,
// logs every event, and on Ctrl-C turns RF off before exiting

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};

use field_regulator::controllers::MockSignalGenerator;
use field_regulator::detection::{Pinger, TcpPinger};
use field_regulator::drivers::generator::{TcpTransport, Transport};
use field_regulator::protocol::{display_frequency, FrequencyUnit, TimeUnit};
use field_regulator::regulation::ControlMode;
use field_regulator::sweep::{default_log_step_count, Spacing, SweepSpec};
use field_regulator::{App, Event, Settings};

/// Closed-loop field-strength regulator for a LAN signal generator.
#[derive(Parser, Debug)]
#[command(name = "field-regulator")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (TOML). Defaults apply to anything it leaves out.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instrument address, overrides the settings file.
    #[arg(short, long)]
    address: Option<String>,

    /// SCPI port, overrides the settings file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Use the in-memory instrument instead of the network.
    #[arg(long)]
    mock: bool,

    /// Log as JSON lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Sweep the carrier while RF is on; RF goes off when the sweep ends.
    Sweep {
        #[arg(long)]
        start: Option<f64>,
        #[arg(long)]
        stop: Option<f64>,
        /// Unit for start and stop.
        #[arg(long, default_value = "MHz")]
        unit: FrequencyUnit,
        /// Step count. Logarithmic sweeps default to 1 % steps.
        #[arg(long)]
        steps: Option<u32>,
        #[arg(long)]
        dwell: Option<f64>,
        #[arg(long, default_value = "ms")]
        dwell_unit: TimeUnit,
        /// Logarithmic spacing.
        #[arg(long)]
        log: bool,
    },
    /// Hold a fixed output power with RF on.
    Hold {
        /// Output power in dBm.
        #[arg(long, allow_hyphen_values = true)]
        power: f64,
        /// Carrier to hold, re-expressed on the instrument's unit ladder.
        #[arg(long)]
        frequency: Option<f64>,
        #[arg(long, default_value = "MHz")]
        unit: FrequencyUnit,
    },
}

fn init_logging(json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("field_regulator=info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(address) = &args.address {
        settings.instrument.address = address.clone();
    }
    if let Some(port) = args.port {
        settings.instrument.port = port;
    }
    settings.validate()?;
    Ok(settings)
}

fn sweep_spec(settings: &Settings, mode: &Mode) -> Result<Option<SweepSpec>> {
    let Mode::Sweep { start, stop, unit, steps, dwell, dwell_unit, log } = mode else {
        return Ok(None);
    };
    let defaults = &settings.sweep;
    let (start, stop, unit) = match (start, stop) {
        (Some(a), Some(b)) => (*a, *b, *unit),
        (None, None) => (defaults.start, defaults.stop, defaults.unit),
        _ => bail!("--start and --stop go together"),
    };
    let spacing = if *log { Spacing::Logarithmic } else { defaults.spacing };
    let (dwell, dwell_unit) = match dwell {
        Some(d) => (*d, *dwell_unit),
        None => (defaults.dwell, defaults.dwell_unit),
    };
    let steps = match (steps, spacing) {
        (Some(n), _) => *n,
        (None, Spacing::Logarithmic) => default_log_step_count(unit.to_mhz(start), unit.to_mhz(stop))?,
        (None, Spacing::Linear) => defaults.steps,
    };
    let spec = SweepSpec::from_units(start, unit, stop, unit, steps, dwell, dwell_unit, spacing)?;
    Ok(Some(spec))
}

async fn wait_for_connection(rx: &mut broadcast::Receiver<Event>) -> Result<String> {
    loop {
        match rx.recv().await {
            Ok(Event::InstrumentConnected(identity)) => return Ok(identity),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => bail!("event bus closed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    let settings = load_settings(&args)?;
    let spec = match &args.mode {
        Some(mode) => sweep_spec(&settings, mode)?,
        None => None,
    };

    let transport: Arc<dyn Transport>;
    let pinger: Arc<dyn Pinger>;
    if args.mock {
        info!("using the in-memory instrument");
        transport = Arc::new(MockSignalGenerator::new());
        pinger = Arc::new(|_: &str, _: Duration| -> std::io::Result<Option<Duration>> { Ok(Some(Duration::ZERO)) });
    } else {
        transport = Arc::new(TcpTransport::new(settings.instrument.io_timeout()));
        pinger = Arc::new(TcpPinger::new(settings.instrument.port));
    }

    let app = Arc::new(App::new(settings, transport, pinger));
    let pump = app.spawn_event_pump();

    // log every event
    let mut log_rx = app.events().subscribe();
    tokio::spawn(async move {
        loop {
            match log_rx.recv().await {
                Ok(Event::FrequencySet(hz)) => {
                    let (value, unit) = display_frequency(hz);
                    info!("frequency {} {}", value, unit);
                }
                Ok(Event::FieldIntensity(_)) => {}
                Ok(event) => info!(?event, "event"),
                Err(broadcast::error::RecvError::Lagged(missed)) => warn!(missed, "event log fell behind"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut rx = app.events().subscribe();
    app.start()?;

    tokio::select! {
        identity = wait_for_connection(&mut rx) => {
            let identity = identity?;
            info!(%identity, "ready");
            match &args.mode {
                Some(Mode::Hold { power, frequency, unit }) => {
                    if let Some(frequency) = frequency {
                        app.client().enter_frequency(*frequency, *unit);
                    }
                    app.set_control_mode(ControlMode::StaticPower);
                    app.set_target(*power);
                    app.client().set_rf_output(true);
                }
                Some(Mode::Sweep { .. }) => {
                    app.enable_sweep(spec);
                    app.client().set_rf_output(true);
                }
                None => {}
            }
            tokio::signal::ctrl_c().await?;
        }
        signal = tokio::signal::ctrl_c() => signal?,
    }

    info!("Ctrl-C received");
    let closing = Arc::clone(&app);
    tokio::task::spawn_blocking(move || closing.shutdown()).await?;
    pump.await?;
    Ok(())
}
