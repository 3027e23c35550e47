//! usbd-sim
//!
//! Enumerates a simulated composite HID device from an emulated host and
//! prints what the host learned. Sessions can be captured and replayed.

use anyhow::{Context, Result, bail};
use clap::Parser;
use common::setup_logging;
use protocol::DeviceSpeed;
use simulator::config::{SimulatorConfig, expand_path};
use simulator::{load_trace, replay, save_trace, simulate};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "usbd-sim")]
#[command(
    author,
    version,
    about = "usbd-sim - Enumerate a simulated composite USB device"
)]
#[command(long_about = "
Runs the device-side USB control plane against an emulated host. The host
resets the device, reads its descriptors and strings, assigns an address,
selects the configuration, talks to every HID function and prints a summary.

EXAMPLES:
    # Enumerate the built-in mouse + vendor channel device
    usbd-sim

    # Use a custom device description
    usbd-sim --config /path/to/simulator.toml

    # Enumerate at high speed and capture the session
    usbd-sim --speed high --trace-out session.trace

    # Check that the current build reproduces a captured session
    usbd-sim --replay session.trace

    # Run with debug logging
    usbd-sim --log-level debug

CONFIGURATION:
    The simulator looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/rust-composite-usbd/simulator.toml
    3. /etc/rust-composite-usbd/simulator.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Bus speed for the reset (full, high)
    #[arg(short, long, value_name = "SPEED", value_parser = parse_speed)]
    speed: Option<DeviceSpeed>,

    /// Write the captured transport trace to this file
    #[arg(short, long, value_name = "PATH")]
    trace_out: Option<PathBuf>,

    /// Replay a captured trace instead of enumerating
    #[arg(short, long, value_name = "PATH", conflicts_with = "trace_out")]
    replay: Option<PathBuf>,
}

fn parse_speed(value: &str) -> Result<DeviceSpeed, String> {
    match value.to_ascii_lowercase().as_str() {
        "full" => Ok(DeviceSpeed::Full),
        "high" => Ok(DeviceSpeed::High),
        other => Err(format!("unsupported speed '{}', expected full or high", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = SimulatorConfig::default();
        let path = SimulatorConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        SimulatorConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        SimulatorConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.simulator.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usbd-sim v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    if let Some(path) = args.replay {
        return replay_mode(&config, &expand_path(&path));
    }

    let trace_out = args.trace_out.map(|p| expand_path(&p)).or_else(|| config.trace_out());
    let speed = args.speed.unwrap_or(config.host.speed);

    let simulation = simulate(&config, speed, trace_out.is_some()).await?;
    println!("{}", simulation.summary);

    if let Some(path) = trace_out {
        save_trace(&path, simulation.trace.records()).context("Failed to save trace")?;
        println!("Trace saved to: {}", path.display());
    }

    Ok(())
}

fn replay_mode(config: &SimulatorConfig, path: &std::path::Path) -> Result<()> {
    let records = load_trace(path)?;
    let report = replay(config, &records)?;

    match report.divergence {
        None => {
            println!(
                "Replay of {} matched: {} stimuli, {} primitives",
                path.display(),
                report.stimuli,
                report.ops
            );
            Ok(())
        }
        Some(divergence) => bail!("Replay of {} diverged {}", path.display(), divergence),
    }
}
