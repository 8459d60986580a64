use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use street_mapper_rs::clock::MonotonicClock;
use street_mapper_rs::position_source::{NmeaSource, PositionSource, ReplaySource, SimulatedSource};
use street_mapper_rs::transport::{JsonLinesTarget, JsonLinesTransport};
use street_mapper_rs::{Command, DeviceConfig, DeviceContext, MapperError};

#[derive(Parser, Debug)]
#[command(name = "street_mapper")]
#[command(
    about = "Street segment mapper - turn detection and telemetry for a tracking device",
    long_about = None
)]
struct Args {
    /// JSON config file (defaults apply to missing fields)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Position source: simulated, replay:<path>, nmea:<path>
    #[arg(long, default_value = "simulated")]
    source: String,

    /// Override the configured device id
    #[arg(long)]
    device_id: Option<String>,

    /// Where published messages go ("-" for stdout)
    #[arg(long, default_value = "-")]
    output: String,

    /// Write the operator status snapshot here
    #[arg(long, value_name = "PATH")]
    status_file: Option<PathBuf>,

    /// Start mapping as soon as there is a fix
    #[arg(long)]
    autostart: bool,

    /// Duration in seconds (0 = continuous)
    #[arg(long, value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn build_source(name: &str, config: &DeviceConfig) -> Result<Box<dyn PositionSource>> {
    let interval = config.simulation.fix_interval_ms;
    if name == "simulated" {
        return Ok(Box::new(SimulatedSource::new(config.simulation)));
    }
    if let Some(path) = name.strip_prefix("replay:") {
        let source = ReplaySource::load(path, interval)
            .with_context(|| format!("loading recording {}", path))?;
        return Ok(Box::new(source));
    }
    if let Some(path) = name.strip_prefix("nmea:") {
        let source = NmeaSource::open(path, interval)
            .with_context(|| format!("opening NMEA input {}", path))?;
        return Ok(Box::new(source));
    }
    bail!("unknown source '{}' (expected simulated, replay:<path> or nmea:<path>)", name)
}

/// Read operator commands from stdin and forward them to the loop
async fn command_reader(tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match line.parse::<Command>() {
                Ok(cmd) => {
                    if tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("{} (try start, stop, status, quit)", e),
            },
            Ok(None) => break,
            Err(e) => {
                log::warn!("stdin read error: {}", e);
                break;
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut config = match &args.config {
        Some(path) => DeviceConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DeviceConfig::default(),
    };
    if let Some(id) = &args.device_id {
        config.device_id = id.clone();
    }
    config.validate()?;

    let source = build_source(&args.source, &config)?;
    let target = if args.output == "-" {
        JsonLinesTarget::Stdout
    } else {
        JsonLinesTarget::File(PathBuf::from(&args.output))
    };

    log::info!("Street mapper starting");
    log::info!("  Device: {}", config.device_id);
    log::info!("  Source: {}", args.source);
    log::info!("  Output: {}", args.output);
    log::info!("  Duration: {} seconds (0=continuous)", args.duration);

    let loop_yield = Duration::from_millis(config.loop_yield_ms);
    let mut device = DeviceContext::new(
        config,
        source,
        Box::new(JsonLinesTransport::new(target)),
        Box::new(MonotonicClock::new()),
    )?;
    if let Some(path) = &args.status_file {
        device = device.with_status_file(path.clone());
    }
    let display_rx = device.subscribe();

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(16);
    let _stdin_handle = tokio::spawn(command_reader(cmd_tx.clone()));
    let ctrl_c_tx = cmd_tx;
    let _signal_handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_tx.send(Command::Quit).await;
        }
    });

    let start = Instant::now();
    let mut autostart_pending = args.autostart;

    'main: loop {
        if args.duration > 0 && start.elapsed().as_secs() >= args.duration {
            log::info!("Duration reached, stopping...");
            break;
        }

        while let Ok(cmd) = cmd_rx.try_recv() {
            if cmd == Command::Quit {
                log::info!("Quit requested");
                break 'main;
            }
            if let Err(e) = device.handle_command(cmd) {
                log::warn!("{:?}: {}", cmd, e);
            }
        }

        device.tick()?;

        let min_satellites = device.config().min_satellites;
        if autostart_pending && device.latest_fix().is_some_and(|f| f.has_fix(min_satellites)) {
            match device.start_mapping() {
                Ok(segment) => {
                    log::info!("Autostart: mapping {}", segment);
                    autostart_pending = false;
                }
                Err(MapperError::NoFix { .. }) => {}
                Err(e) => {
                    log::warn!("Autostart failed: {}", e);
                    autostart_pending = false;
                }
            }
        }

        // Operator display
        while let Ok(event) = display_rx.try_recv() {
            log::info!("[display] {}", event.label());
        }

        if device.source_finished() {
            log::info!("Position source exhausted");
            break;
        }

        sleep(loop_yield).await;
    }

    if let Err(e) = device.handle_command(Command::Quit) {
        log::warn!("Shutdown: {}", e);
    }
    log::info!("Final status: {}", device.refresh_status().summary());
    Ok(())
}
