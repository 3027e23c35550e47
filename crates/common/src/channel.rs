//! Async channel bridge between the Tokio runtime and the device thread
//!
//! The device session is synchronous and must see events strictly in order,
//! so it lives on its own thread behind a [`DeviceWorker`]. The host side
//! talks to it through a cloneable [`DeviceBridge`]. Each command is handled
//! to completion before the worker takes the next one.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::{DeviceState, TransportEvent, TransportOp};
use tokio::sync::oneshot;

/// Commands from the Tokio runtime to the device thread
#[derive(Debug)]
pub enum DeviceCommand {
    /// Deliver one transport event to the session
    Event {
        event: TransportEvent,
        /// Transport primitives the session issued while handling it
        response: oneshot::Sender<Vec<TransportOp>>,
    },

    /// Queue an input report on the function owning `interface`
    SendReport {
        interface: u8,
        data: Vec<u8>,
        response: oneshot::Sender<Result<Vec<TransportOp>, String>>,
    },

    /// Read the device-wide state
    Snapshot {
        response: oneshot::Sender<SessionSnapshot>,
    },

    /// Stop the device thread
    Shutdown,
}

/// Device-wide state as seen from the host side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub state: DeviceState,
    pub address: u8,
    pub configuration: u8,
    pub remote_wakeup: bool,
}

/// Notifications raised by the device thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceNotice {
    /// Enumeration state, address or configuration changed
    StateChanged {
        state: DeviceState,
        address: u8,
        configuration: u8,
    },

    /// Report received on a function's interrupt OUT endpoint
    OutputReport { function: String, data: Vec<u8> },

    /// Payload of a SET_REPORT control transfer
    SetReport {
        function: String,
        report_id: u8,
        data: Vec<u8>,
    },
}

/// Handle for the Tokio runtime (async)
#[derive(Clone)]
pub struct DeviceBridge {
    cmd_tx: Sender<DeviceCommand>,
    notice_rx: Receiver<DeviceNotice>,
}

impl DeviceBridge {
    /// Send a command to the device thread
    pub async fn send_command(&self, cmd: DeviceCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Deliver a transport event and wait for the primitives it produced
    pub async fn deliver(&self, event: TransportEvent) -> crate::Result<Vec<TransportOp>> {
        let (response, rx) = oneshot::channel();
        self.send_command(DeviceCommand::Event { event, response })
            .await?;
        rx.await
            .map_err(|_| crate::Error::Channel("device thread dropped the response".into()))
    }

    /// Queue an input report and wait for the primitives it produced
    pub async fn send_report(&self, interface: u8, data: Vec<u8>) -> crate::Result<Vec<TransportOp>> {
        let (response, rx) = oneshot::channel();
        self.send_command(DeviceCommand::SendReport {
            interface,
            data,
            response,
        })
        .await?;
        rx.await
            .map_err(|_| crate::Error::Channel("device thread dropped the response".into()))?
            .map_err(crate::Error::Device)
    }

    pub async fn snapshot(&self) -> crate::Result<SessionSnapshot> {
        let (response, rx) = oneshot::channel();
        self.send_command(DeviceCommand::Snapshot { response }).await?;
        rx.await
            .map_err(|_| crate::Error::Channel("device thread dropped the response".into()))
    }

    /// Receive a notice from the device thread
    pub async fn recv_notice(&self) -> crate::Result<DeviceNotice> {
        self.notice_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Drain notices without waiting
    pub fn drain_notices(&self) -> Vec<DeviceNotice> {
        std::iter::from_fn(|| self.notice_rx.try_recv().ok()).collect()
    }
}

/// Handle for the device thread (blocking)
pub struct DeviceWorker {
    pub(crate) cmd_rx: Receiver<DeviceCommand>,
    /// Notice sender, cloned into report handlers
    pub notice_tx: Sender<DeviceNotice>,
}

impl DeviceWorker {
    /// Receive a command from the Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<DeviceCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<DeviceCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Post a notice without blocking the device thread
    ///
    /// A full channel drops the notice; the session must never wait on the host.
    pub fn post_notice(&self, notice: DeviceNotice) -> crate::Result<()> {
        post(&self.notice_tx, notice)
    }
}

/// Non-blocking notice delivery shared by the worker and report handlers
pub fn post(tx: &Sender<DeviceNotice>, notice: DeviceNotice) -> crate::Result<()> {
    match tx.try_send(notice) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(notice)) => {
            tracing::warn!("Notice channel full, dropping {:?}", notice);
            Ok(())
        }
        Err(TrySendError::Closed(_)) => Err(crate::Error::Channel("notice channel closed".into())),
    }
}

/// Create the channel bridge between Tokio and the device thread
///
/// Returns (DeviceBridge for Tokio, DeviceWorker for the device thread)
pub fn create_device_bridge() -> (DeviceBridge, DeviceWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (notice_tx, notice_rx) = bounded(256);

    (
        DeviceBridge { cmd_tx, notice_rx },
        DeviceWorker { cmd_rx, notice_tx },
    )
}
