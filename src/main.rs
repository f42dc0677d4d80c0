//! Crosswalk CLI
//!
//! Usage:
//!   crosswalk                                  # Auto-detect serial port, no vision
//!   crosswalk --port /dev/ttyUSB0              # Explicit serial port
//!   crosswalk --vision-cmd "python3 count.py"  # External person counter
//!   crosswalk --no-link --vision-replay 0,2,2  # Hardware-less demo
//!   crosswalk --serve                          # Also expose the HTTP/WS API
//!   crosswalk --json                           # JSON status lines
//!
//! Operator commands on stdin: start | transit | slow | quit

use clap::Parser;
use colored::Colorize;
use std::io::BufRead;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crosswalk::core::{
    run_server, CommandCounter, Crossing, LineTransport, OperatorCommand, ReplayCounter,
    SensorLink, SerialTransport, VisionFeed, VisionWorker,
};
use crosswalk::types::{CrossingSnapshot, Phase};
use crosswalk::{CrossingConfig, VisionError, DEFAULT_BAUD_RATE, VERSION};

/// Serial reads and writes never block a tick longer than this
const LINK_IO_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(
    name = "crosswalk",
    version = VERSION,
    about = "Demand-driven pedestrian crossing controller",
    long_about = "Runs a pedestrian crossing: fuses a vision person count with hall-sensor\n\
                  presence into one demand value, drives the phase cycle, and keeps the\n\
                  pedestrian and vehicle lights on the hardware controller in step.\n\n\
                  Phases:\n  \
                  IDLE            - Vehicles green, waiting for demand\n  \
                  FILLING         - Pedestrians waiting, ring filling\n  \
                  SAFETY_BUFFER   - All red before walk\n  \
                  WALKING         - Pedestrians green, walk budget draining\n  \
                  CLEARING        - All red, crossing clears\n  \
                  TRANSIT_PREEMPT - Transit vehicle priority\n\n\
                  Operator commands on stdin: start, transit, slow, quit"
)]
struct Args {
    /// Serial port of the hardware controller (auto-detected if omitted)
    #[arg(short, long)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Run without the hardware controller
    #[arg(long)]
    no_link: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Shell command that prints one person count per line
    #[arg(long, conflicts_with = "vision_replay")]
    vision_cmd: Option<String>,

    /// Comma-separated person counts to replay instead of a camera
    #[arg(long)]
    vision_replay: Option<String>,

    /// Interval between replayed counts (ms)
    #[arg(long, default_value_t = 1000)]
    replay_interval_ms: u64,

    /// Also run the HTTP/WebSocket API
    #[arg(short, long)]
    serve: bool,

    /// Server address (default: 127.0.0.1:3000)
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Disable colors in output
    #[arg(long)]
    no_color: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.print_config {
        match toml::to_string_pretty(&CrossingConfig::default()) {
            Ok(text) => print!("{}", text),
            Err(e) => {
                eprintln!("Failed to render config: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let config = match &args.config {
        Some(path) => match CrossingConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(1);
            }
        },
        None => CrossingConfig::default(),
    };

    let link = if args.no_link {
        None
    } else {
        open_link(&args, config.link_heartbeat_ms)
    };

    let (feed, worker) = match start_vision(&args) {
        Ok(started) => started,
        Err(e) => {
            warn!(error = %e, "vision unavailable, continuing with hall sensors only");
            (VisionFeed::absent(), None)
        }
    };

    let crossing = match Crossing::new(config, link, feed) {
        Ok(crossing) => crossing,
        Err(e) => {
            eprintln!("Config error: {}", e);
            std::process::exit(1);
        }
    };
    let crossing = match worker {
        Some(worker) => crossing.with_worker(worker),
        None => crossing,
    };

    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (snap_tx, snap_rx) = watch::channel(crossing.snapshot());

    print_header(args.no_color);
    read_operator_commands(cmd_tx.clone());
    tokio::spawn(shutdown_on_ctrl_c(cmd_tx.clone()));
    tokio::spawn(print_status(snap_rx.clone(), args.json, args.no_color));

    if args.serve {
        let addr = args.addr.clone();
        let (rx, tx) = (snap_rx.clone(), cmd_tx.clone());
        tokio::spawn(async move {
            if let Err(e) = run_server(&addr, rx, tx).await {
                error!(error = %e, "api server failed");
            }
        });
    }
    drop(cmd_tx);

    let last = crossing.run(cmd_rx, snap_tx).await;
    println!(
        "\nStopped after {} ticks, {} completed cycles.",
        last.tick, last.cycle_count
    );
}

/// Log to stderr so stdout stays reserved for status lines
fn init_tracing(verbose: bool) {
    let default = if verbose { "crosswalk=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Open the serial link, or run without hardware if no port can be opened
fn open_link(args: &Args, heartbeat_ms: u64) -> Option<SensorLink<Box<dyn LineTransport>>> {
    let port = match &args.port {
        Some(port) => port.clone(),
        None => match SerialTransport::detect_port() {
            Ok(port) => {
                info!(%port, "serial port detected");
                port
            }
            Err(e) => {
                warn!(error = %e, "no serial port, running without hardware");
                return None;
            }
        },
    };

    match SerialTransport::open(&port, args.baud, LINK_IO_TIMEOUT) {
        Ok(transport) => {
            let transport: Box<dyn LineTransport> = Box::new(transport);
            Some(SensorLink::new(transport, heartbeat_ms))
        }
        Err(e) => {
            warn!(error = %e, "serial link unavailable, running without hardware");
            None
        }
    }
}

fn start_vision(args: &Args) -> Result<(VisionFeed, Option<VisionWorker>), VisionError> {
    let spawned = if let Some(cmd) = &args.vision_cmd {
        VisionWorker::spawn(CommandCounter::spawn(cmd)?)?
    } else if let Some(list) = &args.vision_replay {
        let interval = Duration::from_millis(args.replay_interval_ms);
        VisionWorker::spawn(ReplayCounter::parse(list, interval)?)?
    } else {
        return Ok((VisionFeed::absent(), None));
    };
    let (worker, feed) = spawned;
    Ok((feed, Some(worker)))
}

/// Keyboard equivalents of the physical inputs
/// Stdin is read on a plain detached thread: a blocked read must not hold
/// the runtime open after `quit` or Ctrl-C.
fn read_operator_commands(commands: mpsc::Sender<OperatorCommand>) {
    let spawned = std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<OperatorCommand>() {
                    Ok(command) => {
                        if commands.blocking_send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("{} (try start, transit, slow, quit)", e),
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "operator input unavailable");
    }
}

async fn shutdown_on_ctrl_c(commands: mpsc::Sender<OperatorCommand>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        let _ = commands.send(OperatorCommand::Shutdown).await;
    }
}

/// Print one line per phase change or event
async fn print_status(mut rx: watch::Receiver<CrossingSnapshot>, json: bool, no_color: bool) {
    let mut last_phase: Option<Phase> = None;
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        if last_phase == Some(snapshot.phase()) && snapshot.events.is_empty() {
            continue;
        }
        last_phase = Some(snapshot.phase());

        if json {
            match serde_json::to_string(&snapshot) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "failed to encode snapshot"),
            }
        } else if no_color {
            println!("{}", snapshot.to_parseable_string());
        } else {
            println!("{}", snapshot.to_terminal_string());
            for event in &snapshot.events {
                println!("  {} {}", event.code().dimmed(), event.description());
            }
        }
    }
}

fn print_header(no_color: bool) {
    let title = format!("Crosswalk v{} - pedestrian crossing controller", VERSION);
    if no_color {
        println!("========================================");
        println!("  {}", title);
        println!("========================================");
    } else {
        println!("{}", "════════════════════════════════════════".bold());
        println!("  {}", title.bold());
        println!("{}", "════════════════════════════════════════".bold());
    }
    println!("Type start, transit, slow or quit and press Enter.");
    println!();
}
