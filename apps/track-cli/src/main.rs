use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{info, warn};

use tracking_channel::{MockDaemon, MockDevice};
use tracking_client::{
    ConfigOutcome, Connection, ConnectionConfig, ConnectionKey, ConnectionRegistry, Event,
};
use tracking_wire::{ConfigValue, HandRecord, LogSeverity, PolicyFlags, Quaternion, Vector3};

#[derive(Parser, Debug)]
#[command(
    name = "track",
    version,
    about = "Hand-tracking client CLI (drives the in-process mock daemon)",
    disable_help_subcommand = true
)]
struct Cli {
    /// Connection config YAML
    #[arg(long, global = true)]
    config: Option<String>,

    /// Server namespace to connect into
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// Connection id
    #[arg(long, global = true, default_value_t = 0)]
    id: i32,

    /// Override the configured poll timeout
    #[arg(long, global = true)]
    poll_timeout_ms: Option<u64>,

    /// Override the configured frame history capacity
    #[arg(long, global = true)]
    history: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream events from a simulated session
    Monitor {
        /// Frames to simulate
        #[arg(long, default_value_t = 10u32, value_parser = clap::value_parser!(u32).range(1..))]
        frames: u32,
        /// Simulated frame rate
        #[arg(long, default_value_t = 90.0)]
        fps: f64,
        /// Print events as JSON lines
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Do not simulate an attached device
        #[arg(long, action = ArgAction::SetTrue)]
        no_device: bool,
    },
    /// Read a config value
    ConfigGet {
        #[arg(long)]
        key: String,
    },
    /// Write a config value given as JSON (true, 12, 0.5, "text")
    ConfigSet {
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
    },
    /// Request or clear policy flags, then report the active set
    Policy {
        /// Policy names to request, e.g. images,map_points
        #[arg(long, value_delimiter = ',')]
        set: Vec<String>,
        /// Policy names to clear
        #[arg(long, value_delimiter = ',')]
        clear: Vec<String>,
    },
    /// Run a short session and print Prometheus metrics
    Metrics {
        #[arg(long, default_value_t = 30u32, value_parser = clap::value_parser!(u32).range(1..))]
        frames: u32,
    },
}

const EVENT_WAIT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => tracking_client::load_config_file(path)?,
        None => ConnectionConfig::default(),
    };
    if let Some(ms) = cli.poll_timeout_ms {
        config.poll_timeout_ms = ms;
    }
    if let Some(capacity) = cli.history {
        config.frame_history_capacity = capacity;
    }
    let daemon = MockDaemon::new().namespace(cli.namespace.as_deref());
    seed_daemon(&daemon);
    let registry = ConnectionRegistry::new(Arc::new(daemon.clone()), config);
    let key = ConnectionKey::new(cli.id, cli.namespace.as_deref());
    let connection = registry.get_or_create(key)?;
    let events = connection.subscribe();
    connection.start()?;
    info!(connection = %connection.key(), "connected to mock daemon");

    let outcome = match cli.command {
        Commands::Monitor {
            frames,
            fps,
            json,
            no_device,
        } => {
            let session = Session {
                frames,
                fps,
                device: !no_device,
            };
            monitor(&daemon, &connection, &events, session, json)
        }
        Commands::ConfigGet { key } => config_get(&connection, &key),
        Commands::ConfigSet { key, value } => config_set(&connection, &events, &key, &value),
        Commands::Policy { set, clear } => policy(&connection, &events, &set, &clear),
        Commands::Metrics { frames } => {
            simulate(
                &daemon,
                Session {
                    frames,
                    fps: 0.0,
                    device: true,
                },
            );
            drain_until_frame(&events, i64::from(frames))?;
            print!("{}", connection.metrics().encode_text());
            Ok(())
        }
    };
    registry.stop_all();
    outcome
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn seed_daemon(daemon: &MockDaemon) {
    daemon.set_config("tracking_mode", ConfigValue::Int(0));
    daemon.set_config("robust_mode_enabled", ConfigValue::Bool(false));
    daemon.set_config("image_processing_auto_flip", ConfigValue::Bool(true));
    daemon.set_config("tracking_version", ConfigValue::Text("5.x-mock".into()));
}

/// A simulated daemon session.
#[derive(Clone, Copy, Debug)]
struct Session {
    frames: u32,
    /// Zero pushes frames back to back
    fps: f64,
    device: bool,
}

/// Push a plausible session: connection, optionally one device, then frames
/// with a hand pair sweeping sideways.
fn simulate(daemon: &MockDaemon, session: Session) {
    daemon.connect();
    if session.device {
        daemon.attach_device(MockDevice::new(1, "LPMOCK0001"));
    }
    daemon.push_log(LogSeverity::Information, "mock service ready");
    let period_us = if session.fps > 0.0 {
        (1e6 / session.fps) as i64
    } else {
        11_111
    };
    for n in 1..=session.frames {
        let t = f64::from(n) / f64::from(session.frames.max(1));
        let sweep = (t * std::f64::consts::TAU).sin() as f32 * 80.0;
        let hands = [hand(1, 0, sweep - 60.0), hand(2, 1, sweep + 60.0)];
        let frame_id = i64::from(n);
        daemon.push_frame(frame_id, frame_id * period_us, &hands);
        if session.fps > 0.0 {
            std::thread::sleep(Duration::from_micros(period_us as u64));
        }
    }
}

fn hand(id: u32, chirality: u32, x: f32) -> HandRecord {
    HandRecord {
        id,
        chirality,
        confidence: 1.0,
        palm_position: Vector3::new(x, 220.0, 10.0),
        palm_normal: Vector3::new(0.0, -1.0, 0.0),
        palm_orientation: Quaternion::IDENTITY,
        ..Default::default()
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    #[serde(with = "time::serde::rfc3339")]
    at: OffsetDateTime,
    #[serde(flatten)]
    event: &'a Event,
}

fn monitor(
    daemon: &MockDaemon,
    connection: &Connection,
    events: &Receiver<Event>,
    session: Session,
    json: bool,
) -> Result<()> {
    let producer = daemon.clone();
    let feeder = std::thread::spawn(move || simulate(&producer, session));
    let last = i64::from(session.frames);
    loop {
        let event = events
            .recv_timeout(EVENT_WAIT)
            .context("event stream went quiet")?;
        if json {
            let line = EventLine {
                at: OffsetDateTime::now_utc(),
                event: &event,
            };
            println!("{}", serde_json::to_string(&line)?);
        } else {
            print_event(&event);
        }
        if matches!(&event, Event::Frame(f) if f.frame_id >= last) {
            break;
        }
    }
    if feeder.join().is_err() {
        warn!("simulation thread panicked");
    }
    let history = connection.frame_history();
    info!(
        retained = history.len(),
        devices = connection.devices().len(),
        "monitor finished"
    );
    Ok(())
}

fn print_event(event: &Event) {
    match event {
        Event::Frame(frame) => {
            let palms: Vec<String> = frame
                .hands
                .iter()
                .map(|h| format!("{:?} {}", h.chirality, h.palm_position))
                .collect();
            println!(
                "frame {:>5} t={}us hands={} {}",
                frame.frame_id,
                frame.timestamp,
                frame.hands.len(),
                palms.join(" ")
            );
        }
        Event::DeviceAttached(device) => println!("device attached: {device}"),
        Event::DeviceLost(device) => println!("device lost: {device}"),
        Event::DeviceFailed(failure) => {
            println!("device failed: {} ({})", failure.serial, failure.kind)
        }
        Event::Log(entry) => println!("daemon {:?}: {}", entry.severity, entry.message),
        other => println!("{}", other.name()),
    }
}

/// Skip events until frame `frame_id` has been dispatched.
fn drain_until_frame(events: &Receiver<Event>, frame_id: i64) -> Result<()> {
    loop {
        let event = events
            .recv_timeout(EVENT_WAIT)
            .context("event stream went quiet")?;
        if matches!(&event, Event::Frame(f) if f.frame_id >= frame_id) {
            return Ok(());
        }
    }
}

fn await_outcome(done: &Receiver<ConfigOutcome>) -> Result<ConfigOutcome> {
    done.recv_timeout(EVENT_WAIT)
        .context("daemon did not answer the config request")
}

fn config_get(connection: &Connection, key: &str) -> Result<()> {
    let (tx, done) = std::sync::mpsc::channel();
    let request_id = connection.get_config_value_with(key, move |outcome| {
        let _ = tx.send(outcome);
    })?;
    match await_outcome(&done)? {
        ConfigOutcome::Value(value) => {
            println!("{key} = {value}");
            info!(request_id, "config value received");
            Ok(())
        }
        other => Err(anyhow!("unexpected outcome for {key}: {other:?}")),
    }
}

fn config_set(
    connection: &Connection,
    events: &Receiver<Event>,
    key: &str,
    raw: &str,
) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("value is not JSON: {raw}"))?;
    let request_id = connection.set_config_json(key, &value)?;
    loop {
        let event = events
            .recv_timeout(EVENT_WAIT)
            .context("daemon did not answer the config request")?;
        match event {
            Event::ConfigChanged {
                request_id: id,
                succeeded,
                ..
            } if id == request_id => {
                if !succeeded {
                    bail!("daemon rejected {key}");
                }
                println!("{key} <- {value}");
                return Ok(());
            }
            _ => continue,
        }
    }
}

fn parse_policy(names: &[String]) -> Result<PolicyFlags> {
    let config = ConnectionConfig {
        default_policy: names.to_vec(),
        ..Default::default()
    };
    Ok(config.default_policy_flags()?)
}

fn policy(
    connection: &Connection,
    events: &Receiver<Event>,
    set: &[String],
    clear: &[String],
) -> Result<()> {
    let set = parse_policy(set)?;
    let clear = parse_policy(clear)?;
    if set.is_empty() && clear.is_empty() {
        println!("active: {:?}", connection.active_policy());
        return Ok(());
    }
    if !set.is_empty() {
        connection.set_policy(set)?;
    }
    if !clear.is_empty() {
        connection.clear_policy(clear)?;
    }
    let wanted = connection.requested_policy();
    loop {
        let event = events
            .recv_timeout(EVENT_WAIT)
            .context("daemon did not confirm the policy change")?;
        if let Event::PolicyChanged { current, .. } = event {
            if current == wanted {
                break;
            }
        }
    }
    println!("requested: {:?}", wanted);
    println!("active:    {:?}", connection.active_policy());
    Ok(())
}
