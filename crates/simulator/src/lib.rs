//! Composite USB device simulator
//!
//! Runs a [`device::DeviceSession`] on a dedicated worker thread and drives
//! it from an emulated host on the Tokio runtime. Sessions can be captured
//! to a trace file and replayed against a fresh device later.

pub mod assembly;
pub mod config;
pub mod host;
pub mod presets;
pub mod trace;
pub mod worker;

use anyhow::{Context, Result};
use common::{DeviceCommand, create_device_bridge};
use protocol::{DeviceSpeed, TraceLog};
use tracing::{error, info, warn};

pub use assembly::{NoticeHandler, build_session};
pub use config::SimulatorConfig;
pub use host::{EnumerationSummary, HostEmulator, Reply};
pub use trace::{Divergence, ReplayReport, load_trace, replay, save_trace};
pub use worker::{DeviceWorkerThread, spawn_device_worker};

/// Result of one simulated enumeration
#[derive(Debug)]
pub struct Simulation {
    pub summary: EnumerationSummary,
    /// Empty unless capture was requested
    pub trace: TraceLog,
}

/// Speed the device actually runs at when the host resets it at `requested`
///
/// A device without high-speed descriptors stays at full speed.
pub fn negotiated_speed(config: &SimulatorConfig, requested: DeviceSpeed) -> DeviceSpeed {
    if requested.is_high() && !config.device.high_speed {
        warn!("Device is not high-speed capable, running at full speed");
        DeviceSpeed::Full
    } else {
        requested
    }
}

/// Build the device, enumerate it from the emulated host and shut down
pub async fn simulate(config: &SimulatorConfig, speed: DeviceSpeed, capture: bool) -> Result<Simulation> {
    let (bridge, worker) = create_device_bridge();
    let session = build_session(config, Some(worker.notice_tx.clone()))?;
    let handle = spawn_device_worker(session, worker, capture)
        .context("Failed to spawn device worker thread")?;

    let speed = negotiated_speed(config, speed);
    let mut host = HostEmulator::new(bridge.clone());
    let result = host.enumerate(speed, config.host.address).await;

    info!("Shutting down device worker...");
    if let Err(e) = bridge.send_command(DeviceCommand::Shutdown).await {
        error!("Error shutting down device worker: {:#}", e);
    }

    let trace = match handle.join() {
        Ok(trace) => trace,
        Err(e) => {
            error!("Device worker thread panicked: {:?}", e);
            TraceLog::new()
        }
    };

    Ok(Simulation {
        summary: result?,
        trace,
    })
}
