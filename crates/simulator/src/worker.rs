//! Device worker thread
//!
//! Owns the [`DeviceSession`] and processes commands from the Tokio runtime
//! one at a time. Every command runs to completion, including all transport
//! primitives it triggers, before the next one is taken off the channel.

use common::{DeviceCommand, DeviceNotice, DeviceWorker, SessionSnapshot};
use device::{DeviceSession, RecordingTransport};
use protocol::{TraceEntry, TraceLog, TransportOp};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

pub struct DeviceWorkerThread {
    session: DeviceSession<RecordingTransport>,
    worker: DeviceWorker,
    /// Captured trace (None = capture disabled)
    trace: Option<TraceLog>,
    last_snapshot: SessionSnapshot,
}

impl DeviceWorkerThread {
    pub fn new(session: DeviceSession<RecordingTransport>, worker: DeviceWorker, capture: bool) -> Self {
        let last_snapshot = snapshot(&session);
        Self {
            session,
            worker,
            trace: capture.then(TraceLog::new),
            last_snapshot,
        }
    }

    /// Process commands until Shutdown or until every bridge is dropped
    ///
    /// Returns the captured trace, empty when capture was disabled.
    pub fn run(mut self) -> TraceLog {
        info!("Device worker thread started");

        while let Ok(cmd) = self.worker.recv_command() {
            if matches!(cmd, DeviceCommand::Shutdown) {
                info!("Device worker shutting down");
                break;
            }
            self.handle_command(cmd);
        }

        info!("Device worker thread stopped");
        self.trace.unwrap_or_default()
    }

    fn handle_command(&mut self, cmd: DeviceCommand) {
        // A panicking handler must not take the device thread down with it
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in device command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: DeviceCommand) {
        match cmd {
            DeviceCommand::Event { event, response } => {
                debug!("Event {:?}", event);
                self.record(TraceEntry::Event(event.clone()));
                self.session.handle_event(&event);
                let ops = self.drain_ops();
                self.notify_state();
                let _ = response.send(ops);
            }

            DeviceCommand::SendReport {
                interface,
                data,
                response,
            } => {
                debug!("Report of {} bytes on interface {}", data.len(), interface);
                self.record(TraceEntry::Report {
                    interface,
                    data: data.clone(),
                });
                let result = self.session.send_report(interface, &data);
                let ops = self.drain_ops();
                let _ = response.send(result.map(|()| ops).map_err(|e| e.to_string()));
            }

            DeviceCommand::Snapshot { response } => {
                let _ = response.send(snapshot(&self.session));
            }

            DeviceCommand::Shutdown => {}
        }
    }

    fn drain_ops(&mut self) -> Vec<TransportOp> {
        let ops = self.session.port_mut().take_ops();
        if let Some(trace) = &mut self.trace {
            for op in &ops {
                trace.push(TraceEntry::Op(op.clone()));
            }
        }
        ops
    }

    fn record(&mut self, entry: TraceEntry) {
        if let Some(trace) = &mut self.trace {
            trace.push(entry);
        }
    }

    fn notify_state(&mut self) {
        let current = snapshot(&self.session);
        let changed = current.state != self.last_snapshot.state
            || current.address != self.last_snapshot.address
            || current.configuration != self.last_snapshot.configuration;
        self.last_snapshot = current;

        if changed {
            let notice = DeviceNotice::StateChanged {
                state: current.state,
                address: current.address,
                configuration: current.configuration,
            };
            if let Err(e) = self.worker.post_notice(notice) {
                debug!("State notice not delivered: {}", e);
            }
        }
    }
}

pub fn snapshot(session: &DeviceSession<RecordingTransport>) -> SessionSnapshot {
    SessionSnapshot {
        state: session.state(),
        address: session.address(),
        configuration: session.configuration(),
        remote_wakeup: session.remote_wakeup(),
    }
}

/// Spawn the device worker thread
pub fn spawn_device_worker(
    session: DeviceSession<RecordingTransport>,
    worker: DeviceWorker,
    capture: bool,
) -> std::io::Result<JoinHandle<TraceLog>> {
    std::thread::Builder::new()
        .name("device-worker".to_string())
        .spawn(move || DeviceWorkerThread::new(session, worker, capture).run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::build_session;
    use crate::config::SimulatorConfig;
    use common::create_device_bridge;
    use protocol::{DeviceSpeed, DeviceState, SetupRequest, TransportEvent};

    #[tokio::test]
    async fn test_worker_records_trace() {
        let (bridge, worker) = create_device_bridge();
        let session = build_session(&SimulatorConfig::default(), None).unwrap();
        let handle = spawn_device_worker(session, worker, true).unwrap();

        let ops = bridge
            .deliver(TransportEvent::Reset {
                speed: DeviceSpeed::Full,
            })
            .await
            .unwrap();
        assert!(!ops.is_empty());

        bridge.send_command(DeviceCommand::Shutdown).await.unwrap();
        let trace = handle.join().unwrap();
        assert!(trace.records()[0].is_event());
        assert_eq!(trace.len(), 1 + ops.len());
    }

    #[tokio::test]
    async fn test_worker_without_capture() {
        let (bridge, worker) = create_device_bridge();
        let session = build_session(&SimulatorConfig::default(), None).unwrap();
        let handle = spawn_device_worker(session, worker, false).unwrap();

        bridge
            .deliver(TransportEvent::Reset {
                speed: DeviceSpeed::Full,
            })
            .await
            .unwrap();
        drop(bridge);
        assert!(handle.join().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_posts_state_changes() {
        let (bridge, worker) = create_device_bridge();
        let session = build_session(&SimulatorConfig::default(), None).unwrap();
        let handle = spawn_device_worker(session, worker, false).unwrap();

        bridge
            .deliver(TransportEvent::Reset {
                speed: DeviceSpeed::Full,
            })
            .await
            .unwrap();
        bridge
            .deliver(TransportEvent::Setup {
                packet: SetupRequest::set_address(9).to_bytes(),
            })
            .await
            .unwrap();

        let notices = bridge.drain_notices();
        assert!(notices.contains(&DeviceNotice::StateChanged {
            state: DeviceState::Addressed,
            address: 9,
            configuration: 0,
        }));
        assert_eq!(bridge.snapshot().await.unwrap().address, 9);

        bridge.send_command(DeviceCommand::Shutdown).await.unwrap();
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_report_before_configuration_fails() {
        let (bridge, worker) = create_device_bridge();
        let session = build_session(&SimulatorConfig::default(), None).unwrap();
        let handle = spawn_device_worker(session, worker, true).unwrap();

        assert!(bridge.send_report(0, vec![0; 4]).await.is_err());

        bridge.send_command(DeviceCommand::Shutdown).await.unwrap();
        let trace = handle.join().unwrap();
        assert_eq!(trace.len(), 1);
        assert!(trace.records()[0].is_stimulus());
    }
}
