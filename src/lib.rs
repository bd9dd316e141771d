// src/lib.rs
//
// ledbus: CAN bus emulator for the shift-light LED controller.
//
// Builds protocol frames from physical values, sends them once or cyclically over a
// serial line (emulator `CAN:` lines or slcan), and shows the LED colour stream the
// controller reports back.

// Logging macros must be declared before every module that uses them
#[macro_use]
mod logging;

pub mod io;
pub mod monitor;
pub mod presets;
pub mod protocols;
pub mod sessions;
pub mod settings;
pub mod snapshot;
pub mod transmit;

pub use logging::{init_file_logging, is_verbose, set_verbose, stop_file_logging};

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use io::line::InboundLine;
use io::serial::{LineReader, SerialTransport};
use io::slcan::{SlcanChannel, COMMAND_GAP};
use io::{StdoutTransport, Transport, WireFormat};
use monitor::StripMonitor;
use sessions::{parse_frame_id, parse_value, Session};
use settings::AppSettings;
use snapshot::SessionSnapshot;
use transmit::TransmitStats;

/// How often `run` logs transmit statistics
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Command line
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "ledbus", version, about = "CAN bus emulator for the shift-light LED controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Serial port (overrides settings and --config)
    #[arg(long, global = true)]
    port: Option<String>,

    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Outbound wire format: emulator or slcan
    #[arg(long, global = true)]
    wire: Option<WireFormat>,

    /// slcan bus bitrate in bit/s
    #[arg(long, global = true)]
    bitrate: Option<u32>,

    /// Protocol table to load
    #[arg(long, global = true)]
    protocol: Option<String>,

    /// Named preset applied after loading
    #[arg(long, global = true)]
    preset: Option<String>,

    /// Field override: `name=value` (every frame with that field), `5F0.name=value`,
    /// `5F0.enabled=off` or `5F0.interval=50`. Repeatable.
    #[arg(long = "set", global = true, value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Interval in ms applied to every frame
    #[arg(long, global = true)]
    interval: Option<u64>,

    /// Load a saved session configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Save the final session configuration (JSON)
    #[arg(long, global = true)]
    save: Option<PathBuf>,

    /// Write frames to stdout instead of a serial port
    #[arg(long, global = true)]
    dry_run: bool,

    /// Trace every transmitted frame
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Mirror the log into a file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Settings file (default: <config dir>/ledbus/settings.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Write --port, --baud, --wire, --bitrate, --protocol, --interval and --log-dir
    /// into the settings file as the new defaults
    #[arg(long, global = true)]
    save_settings: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in protocol tables
    Protocols {
        /// Also report encoding and layout issues
        #[arg(long)]
        validate: bool,
    },
    /// List the named presets
    Presets,
    /// Print the line for every enabled frame without opening a port
    Preview {
        /// Decode each payload back into field values
        #[arg(long)]
        decode: bool,
    },
    /// Send every enabled frame once
    Send,
    /// Transmit cyclically until Ctrl-C or --duration
    Run {
        /// Stop after this many seconds
        #[arg(long, value_name = "SECONDS")]
        duration: Option<f64>,
        /// Show the LED colour stream while transmitting
        #[arg(long)]
        monitor: bool,
    },
    /// Show the LED colour stream reported by the controller
    Monitor {
        #[arg(long, value_name = "SECONDS")]
        duration: Option<f64>,
    },
    /// List available serial ports
    Ports,
}

// ============================================================================
// Entry point
// ============================================================================

pub fn run() {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tlog!("[ledbus] Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(execute(cli)) {
        Ok(()) => 0,
        Err(e) => {
            tlog!("[ledbus] {}", e);
            1
        }
    };

    logging::stop_file_logging();
    std::process::exit(code);
}

async fn execute(cli: Cli) -> Result<(), String> {
    logging::set_verbose(cli.verbose);
    let mut settings = load_app_settings(cli.settings.as_deref())?;

    if cli.save_settings {
        settings = settings_with_overrides(&cli, &settings);
        let path = match &cli.settings {
            Some(path) => path.clone(),
            None => settings::default_settings_path()?,
        };
        settings::save_settings(&path, &settings)?;
    }

    if let Some(dir) = cli.log_dir.as_ref().or(settings.log_dir.as_ref()) {
        logging::init_file_logging(dir)?;
    }

    match &cli.command {
        Command::Protocols { validate } => {
            print_protocols(*validate);
            return Ok(());
        }
        Command::Presets => {
            for name in presets::preset_names() {
                println!("{:<14} {}", name, presets::preset_label(name).unwrap_or(""));
            }
            return Ok(());
        }
        Command::Ports => return print_ports(),
        Command::Monitor { duration } => return monitor_only(&cli, &settings, *duration).await,
        _ => {}
    }

    let mut session = build_session(&cli, &settings).await?;

    match &cli.command {
        Command::Preview { decode } => print_preview(&session, *decode),
        Command::Send => {
            let link = open_link(&cli, &settings, &session, false)?;
            session.connect(link.transport, link.wire).await;
            session.set_connection_info(link.connection);

            let report = session.send_once().map_err(|e| e.to_string())?;
            session.disconnect().await;
            tlog!("[ledbus] Sent {} frames ({} failed)", report.sent, report.failed());
            if report.failed() > 0 && report.sent == 0 {
                return Err("No frames could be sent".to_string());
            }
        }
        Command::Run { duration, monitor } => {
            let link = open_link(&cli, &settings, &session, *monitor)?;
            let inbound = link.reader_source.map(|source| spawn_reader(&link.device, source));
            session.connect(link.transport, link.wire).await;
            session.set_connection_info(link.connection);

            session.start_cyclic().map_err(|e| e.to_string())?;
            let stats = session.stats();
            let result = pump(*duration, inbound, Some(stats.clone())).await;
            session.disconnect().await;
            tlog!(
                "[ledbus] {} frames sent, {} failed, {:.1} frames/s",
                stats.sent(),
                stats.failed(),
                stats.rate()
            );
            result?;
        }
        Command::Protocols { .. } | Command::Presets | Command::Ports | Command::Monitor { .. } => {}
    }

    if let Some(path) = &cli.save {
        save_snapshot(path, &session)?;
    }
    Ok(())
}

// ============================================================================
// Settings and session setup
// ============================================================================

fn load_app_settings(path: Option<&Path>) -> Result<AppSettings, String> {
    match path {
        Some(path) => settings::load_settings(path),
        None => match settings::default_settings_path() {
            Ok(path) => settings::load_settings(&path),
            Err(e) => {
                vlog!("[settings] {}, using defaults", e);
                Ok(AppSettings::default())
            }
        },
    }
}

/// Settings with the command-line connection and default options folded in.
fn settings_with_overrides(cli: &Cli, settings: &AppSettings) -> AppSettings {
    let mut merged = settings.clone();
    if let Some(port) = &cli.port {
        merged.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        merged.baud_rate = baud;
    }
    if let Some(wire) = cli.wire {
        merged.wire = wire;
    }
    if let Some(bitrate) = cli.bitrate {
        merged.slcan_bitrate = bitrate;
    }
    if let Some(protocol) = &cli.protocol {
        merged.protocol = protocol.clone();
    }
    if let Some(interval) = cli.interval {
        merged.default_interval_ms = interval;
    }
    if let Some(dir) = &cli.log_dir {
        merged.log_dir = Some(dir.clone());
    }
    merged
}

async fn build_session(cli: &Cli, settings: &AppSettings) -> Result<Session, String> {
    let quantum = Duration::from_millis(settings.tick_quantum_ms.max(1));
    let mut session = Session::with_quantum(&settings.protocol, quantum).map_err(|e| e.to_string())?;

    if let Some(path) = &cli.config {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let snapshot = SessionSnapshot::from_json(&text)?;
        session.restore(&snapshot).await.map_err(|e| e.to_string())?;
    } else if settings.default_interval_ms != transmit::DEFAULT_INTERVAL_MS {
        session
            .apply_interval_to_all(settings.default_interval_ms)
            .map_err(|e| format!("Invalid default_interval_ms in settings: {}", e))?;
    }

    if let Some(name) = &cli.protocol {
        if *name != session.protocol() {
            session.load_protocol(name).await.map_err(|e| e.to_string())?;
        }
    }

    if let Some(ms) = cli.interval {
        session.apply_interval_to_all(ms).map_err(|e| e.to_string())?;
    }

    if let Some(name) = &cli.preset {
        session.apply_preset(name).map_err(|e| e.to_string())?;
    }

    for assignment in &cli.set {
        apply_assignment(&session, assignment)?;
    }

    Ok(session)
}

/// Apply one `--set` argument.
fn apply_assignment(session: &Session, assignment: &str) -> Result<(), String> {
    let (key, text) = assignment
        .split_once('=')
        .ok_or_else(|| format!("Expected KEY=VALUE, got '{}'", assignment))?;
    let key = key.trim();

    let result = match key.split_once('.') {
        Some((id_text, field)) => {
            let frame_id = parse_frame_id(id_text).map_err(|e| e.to_string())?;
            match field {
                "enabled" => parse_value(text).and_then(|v| session.set_enabled(frame_id, v != 0.0)),
                "interval" => session.set_interval_text(frame_id, text),
                _ => parse_value(text).and_then(|v| session.set_field_value(frame_id, field, v)),
            }
        }
        None => parse_value(text)
            .and_then(|v| session.set_value_everywhere(key, v))
            .map(|_| ()),
    };

    result.map_err(|e| format!("--set {}: {}", assignment, e))
}

fn save_snapshot(path: &Path, session: &Session) -> Result<(), String> {
    let json = session.snapshot().to_json()?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    tlog!("[session] Saved configuration to {}", path.display());
    Ok(())
}

// ============================================================================
// Transport setup
// ============================================================================

struct Link {
    device: String,
    transport: Box<dyn Transport>,
    wire: WireFormat,
    /// Second handle on the port for the inbound reader, when requested
    reader_source: Option<Box<dyn serialport::SerialPort>>,
    connection: Map<String, Value>,
}

/// Resolve the serial port: command line, then the loaded configuration, then settings.
fn resolve_port(cli: &Cli, settings: &AppSettings, session: &Session) -> Option<String> {
    cli.port
        .clone()
        .or_else(|| {
            session
                .connection_info()
                .get("channel")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| Some(settings.port.clone()))
        .filter(|p| !p.is_empty())
}

fn resolve_wire(cli: &Cli, settings: &AppSettings, session: &Session) -> WireFormat {
    cli.wire
        .or_else(|| {
            session
                .connection_info()
                .get("interface")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
        })
        .unwrap_or(settings.wire)
}

fn open_link(cli: &Cli, settings: &AppSettings, session: &Session, with_reader: bool) -> Result<Link, String> {
    let wire = resolve_wire(cli, settings, session);
    let bitrate = cli.bitrate.unwrap_or(settings.slcan_bitrate);

    if cli.dry_run {
        if with_reader {
            return Err("--monitor needs a serial port, not --dry-run".to_string());
        }
        let transport: Box<dyn Transport> = match wire {
            WireFormat::Emulator => Box::new(StdoutTransport::new()),
            WireFormat::Slcan => Box::new(
                SlcanChannel::open(StdoutTransport::new(), bitrate, Duration::ZERO).map_err(|e| e.to_string())?,
            ),
        };
        return Ok(Link {
            device: "stdout".to_string(),
            transport,
            wire,
            reader_source: None,
            connection: connection_info(wire, "stdout", bitrate),
        });
    }

    let port = resolve_port(cli, settings, session)
        .ok_or_else(|| "No serial port configured (use --port, or set port in settings)".to_string())?;
    let mut config = settings.serial_config();
    config.port = port.clone();
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }

    let serial = SerialTransport::open(&config).map_err(|e| e.to_string())?;
    let reader_source = if with_reader {
        Some(serial.try_clone_port().map_err(|e| e.to_string())?)
    } else {
        None
    };
    let device = serial.name().to_string();

    let transport: Box<dyn Transport> = match wire {
        WireFormat::Emulator => Box::new(serial),
        WireFormat::Slcan => {
            Box::new(SlcanChannel::open(serial, bitrate, COMMAND_GAP).map_err(|e| e.to_string())?)
        }
    };

    let connection = match wire {
        WireFormat::Emulator => connection_info(wire, &port, config.baud_rate),
        WireFormat::Slcan => connection_info(wire, &port, bitrate),
    };

    Ok(Link {
        device,
        transport,
        wire,
        reader_source,
        connection,
    })
}

/// Connection keys stored at the top level of a saved configuration
fn connection_info(wire: WireFormat, channel: &str, bitrate: u32) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("interface".to_string(), Value::from(wire.as_str()));
    map.insert("channel".to_string(), Value::from(channel));
    map.insert("bitrate".to_string(), Value::from(bitrate));
    map
}

// ============================================================================
// Inbound stream
// ============================================================================

struct Inbound {
    reader: LineReader,
    rx: mpsc::Receiver<InboundLine>,
    monitor: StripMonitor<std::io::Stdout>,
}

fn spawn_reader(device: &str, source: Box<dyn serialport::SerialPort>) -> Inbound {
    let (tx, rx) = mpsc::channel(256);
    Inbound {
        reader: LineReader::spawn(device, source, tx),
        rx,
        monitor: StripMonitor::new(std::io::stdout()),
    }
}

async fn next_line(inbound: &mut Option<Inbound>) -> Option<InboundLine> {
    match inbound {
        Some(inbound) => inbound.rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Wait for Ctrl-C or the deadline while rendering inbound lines.
async fn pump(
    duration: Option<f64>,
    mut inbound: Option<Inbound>,
    stats: Option<Arc<TransmitStats>>,
) -> Result<(), String> {
    let limit = duration
        .map(|secs| Duration::try_from_secs_f64(secs).map_err(|_| format!("Invalid duration {}", secs)))
        .transpose()?;

    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;

    let mut result = Ok(());
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tlog!("[ledbus] Interrupted");
                break;
            }
            _ = &mut deadline => break,
            _ = status.tick() => {
                if let Some(stats) = &stats {
                    tlog!(
                        "[transmit] {} sent, {} failed, {:.1} frames/s",
                        stats.sent(),
                        stats.failed(),
                        stats.rate()
                    );
                }
            }
            line = next_line(&mut inbound) => match (line, inbound.as_mut()) {
                (Some(line), Some(inbound)) => {
                    if let Err(e) = inbound.monitor.handle(&line) {
                        result = Err(format!("Failed to write to terminal: {}", e));
                        break;
                    }
                }
                _ => {
                    tlog!("[monitor] Reader ended");
                    break;
                }
            },
        }
    }

    if let Some(mut inbound) = inbound {
        // A closed channel releases a reader waiting on a full queue
        inbound.rx.close();
        inbound.reader.stop().await;
        if let Err(e) = inbound.monitor.finish() {
            tlog!("[monitor] {}", e);
        }
    }
    result
}

async fn monitor_only(cli: &Cli, settings: &AppSettings, duration: Option<f64>) -> Result<(), String> {
    if cli.dry_run {
        return Err("monitor needs a serial port, not --dry-run".to_string());
    }
    let port = cli
        .port
        .clone()
        .or_else(|| Some(settings.port.clone()))
        .filter(|p| !p.is_empty())
        .ok_or_else(|| "No serial port configured (use --port, or set port in settings)".to_string())?;
    let mut config = settings.serial_config();
    config.port = port;
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }

    // Hold the port open while the reader works on its clone
    let mut serial = SerialTransport::open(&config).map_err(|e| e.to_string())?;
    let source = serial.try_clone_port().map_err(|e| e.to_string())?;
    let inbound = spawn_reader(serial.name(), source);

    let result = pump(duration, Some(inbound), None).await;
    serial.close();
    result
}

// ============================================================================
// Listings
// ============================================================================

fn print_protocols(validate: bool) {
    for name in protocols::list_protocols() {
        let Some(protocol) = protocols::get_protocol(name) else {
            continue;
        };
        println!("{} ({} frames)", protocol.name, protocol.frames.len());
        for frame in &protocol.frames {
            let fields: Vec<&str> = frame.fields.iter().map(|f| f.name.as_str()).collect();
            println!(
                "  0x{:03X}  [{}] {:<20} {}",
                frame.id,
                frame.dlc,
                frame.name,
                fields.join(", ")
            );
        }
        if validate {
            let issues = protocol.validate();
            if issues.is_empty() {
                println!("  no issues");
            }
            for issue in issues {
                println!("  ! {}", issue);
            }
        }
    }
}

fn print_ports() -> Result<(), String> {
    let ports = io::serial::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

fn print_preview(session: &Session, decode: bool) {
    for state in session.frame_states().iter().filter(|s| s.enabled) {
        let line = match session.preview(state.definition.id) {
            Ok(line) => line,
            Err(e) => {
                tlog!("[session] {}", e);
                continue;
            }
        };
        print!("{}", line);
        if decode {
            for (name, value) in state.definition.decode(&state.payload()) {
                println!("    {} = {}", name, value);
            }
        }
    }
}
