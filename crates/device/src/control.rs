//! Control transfer stage tracker
//!
//! Drives one setup -> data -> status sequence on endpoint 0 at a time:
//!
//! ```text
//!          send()            last packet sent         status ZLP received
//!  Idle ───────────> DataIn ───────────────> StatusOut ──────────────────> Idle
//!    │   receive()          payload complete + finish_out()   ZLP sent
//!    ├─────────────> DataOut ─────────────────────────> StatusIn ───────> Idle
//!    │   ack()                                            ^
//!    └────────────────────────────────────────────────────┘
//! ```
//!
//! A new setup packet or a stall discards the transfer in flight. An OUT
//! packet during the IN data stage is the host's early status and ends it.

use crate::error::ControlError;
use crate::transport::TransportPort;
use protocol::{EndpointAddress, SetupRequest};
use tracing::{debug, trace, warn};

/// Where endpoint 0 is within the current control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlStage {
    /// No transfer in flight
    #[default]
    Idle,
    /// IN data stage in progress
    DataIn,
    /// OUT data stage in progress, or waiting for the payload handler
    DataOut,
    /// Zero-length IN status packet queued
    StatusIn,
    /// Zero-length OUT status packet armed
    StatusOut,
}

/// OUT data stage collected in full
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPayload {
    pub request: SetupRequest,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct Transfer {
    request: SetupRequest,
    stage: ControlStage,
    buffer: Vec<u8>,
    offset: usize,
    zlp_pending: bool,
    payload_taken: bool,
}

impl Transfer {
    fn new(request: SetupRequest, stage: ControlStage) -> Self {
        Self {
            request,
            stage,
            buffer: Vec::new(),
            offset: 0,
            zlp_pending: false,
            payload_taken: false,
        }
    }
}

/// Endpoint 0 stage tracker
#[derive(Debug)]
pub struct ControlPipe {
    /// bMaxPacketSize0, never below 8
    max_packet_size: u16,
    transfer: Option<Transfer>,
}

impl ControlPipe {
    pub fn new(max_packet_size: u8) -> Self {
        Self {
            max_packet_size: u16::from(max_packet_size.max(8)),
            transfer: None,
        }
    }

    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    pub fn set_max_packet_size(&mut self, max_packet_size: u8) {
        self.max_packet_size = u16::from(max_packet_size.max(8));
    }

    pub fn stage(&self) -> ControlStage {
        self.transfer.as_ref().map_or(ControlStage::Idle, |t| t.stage)
    }

    /// Request owning the transfer in flight
    pub fn request(&self) -> Option<&SetupRequest> {
        self.transfer.as_ref().map(|t| &t.request)
    }

    /// Drop the transfer in flight without completing it
    ///
    /// Returns whether anything was discarded.
    pub fn abort(&mut self) -> bool {
        match self.transfer.take() {
            Some(t) => {
                debug!(
                    "Aborting control transfer {:#04x} in {:?}",
                    t.request.request, t.stage
                );
                true
            }
            None => false,
        }
    }

    /// Bus reset
    pub fn reset(&mut self) {
        self.transfer = None;
    }

    /// Start an IN data stage with `data`, truncated to wLength
    pub fn send(
        &mut self,
        port: &mut dyn TransportPort,
        request: SetupRequest,
        mut data: Vec<u8>,
    ) -> Result<(), ControlError> {
        let requested = usize::from(request.length);
        data.truncate(requested);

        let mps = usize::from(self.max_packet_size);
        let mut transfer = Transfer::new(request, ControlStage::DataIn);
        // A short data stage that ends on a packet boundary needs a ZLP so the
        // host sees the end of the transfer
        transfer.zlp_pending = !data.is_empty() && data.len() < requested && data.len() % mps == 0;

        let first = data.len().min(mps);
        trace!(
            "Data IN stage: {} of {} requested bytes",
            data.len(),
            requested
        );
        port.transmit(EndpointAddress::EP0_IN, &data[..first])?;
        transfer.offset = first;
        transfer.buffer = data;
        self.transfer = Some(transfer);
        Ok(())
    }

    /// Start an OUT data stage of wLength bytes
    pub fn receive(
        &mut self,
        port: &mut dyn TransportPort,
        request: SetupRequest,
    ) -> Result<(), ControlError> {
        let chunk = request.length.min(self.max_packet_size);
        trace!("Data OUT stage: expecting {} bytes", request.length);
        port.prepare_receive(EndpointAddress::EP0_OUT, chunk)?;
        let mut transfer = Transfer::new(request, ControlStage::DataOut);
        transfer.buffer.reserve(usize::from(request.length));
        self.transfer = Some(transfer);
        Ok(())
    }

    /// Status-only completion
    pub fn ack(
        &mut self,
        port: &mut dyn TransportPort,
        request: SetupRequest,
    ) -> Result<(), ControlError> {
        port.transmit(EndpointAddress::EP0_IN, &[])?;
        self.transfer = Some(Transfer::new(request, ControlStage::StatusIn));
        trace!("Status IN queued for {:#04x}", request.request);
        Ok(())
    }

    /// Send the status ZLP once the collected payload was accepted
    pub fn finish_out(&mut self, port: &mut dyn TransportPort) -> Result<(), ControlError> {
        match self.transfer.as_mut() {
            Some(t) if t.stage == ControlStage::DataOut && t.payload_taken => {
                port.transmit(EndpointAddress::EP0_IN, &[])?;
                t.stage = ControlStage::StatusIn;
                Ok(())
            }
            _ => Err(ControlError::MalformedRequest("no OUT data stage to finish")),
        }
    }

    /// Stall both halves of endpoint 0 and return to Idle
    pub fn stall(&mut self, port: &mut dyn TransportPort) {
        self.transfer = None;
        for endpoint in [EndpointAddress::EP0_IN, EndpointAddress::EP0_OUT] {
            if let Err(e) = port.stall(endpoint) {
                warn!("Failed to stall {}: {}", endpoint, e);
            }
        }
    }

    /// A packet on EP0 IN went out
    pub fn on_in_complete(&mut self, port: &mut dyn TransportPort) -> Result<(), ControlError> {
        let mps = usize::from(self.max_packet_size);
        let Some(t) = self.transfer.as_mut() else {
            trace!("IN completion on idle control pipe");
            return Ok(());
        };

        match t.stage {
            ControlStage::DataIn if t.offset < t.buffer.len() => {
                let end = (t.offset + mps).min(t.buffer.len());
                port.transmit(EndpointAddress::EP0_IN, &t.buffer[t.offset..end])?;
                t.offset = end;
            }
            ControlStage::DataIn if t.zlp_pending => {
                t.zlp_pending = false;
                port.transmit(EndpointAddress::EP0_IN, &[])?;
            }
            ControlStage::DataIn => {
                port.prepare_receive(EndpointAddress::EP0_OUT, 0)?;
                t.stage = ControlStage::StatusOut;
                trace!("Data IN stage done, status OUT armed");
            }
            ControlStage::StatusIn => {
                trace!("Control transfer {:#04x} complete", t.request.request);
                self.transfer = None;
            }
            stage => {
                warn!("Unexpected IN completion in {:?}", stage);
            }
        }
        Ok(())
    }

    /// A packet on EP0 OUT arrived
    ///
    /// Returns the collected payload once the data stage is complete: either
    /// wLength bytes arrived or the host ended early with a short packet.
    pub fn on_out_complete(
        &mut self,
        port: &mut dyn TransportPort,
        data: &[u8],
    ) -> Result<Option<ControlPayload>, ControlError> {
        let mps = usize::from(self.max_packet_size);
        let Some(t) = self.transfer.as_mut() else {
            trace!("OUT completion on idle control pipe");
            return Ok(None);
        };

        match t.stage {
            ControlStage::DataOut if !t.payload_taken => {
                let expected = usize::from(t.request.length);
                t.buffer.extend_from_slice(data);
                if t.buffer.len() >= expected || data.len() < mps {
                    t.buffer.truncate(expected);
                    t.payload_taken = true;
                    trace!("Data OUT stage done: {} bytes", t.buffer.len());
                    return Ok(Some(ControlPayload {
                        request: t.request,
                        data: std::mem::take(&mut t.buffer),
                    }));
                }
                let remaining = (expected - t.buffer.len()).min(mps) as u16;
                port.prepare_receive(EndpointAddress::EP0_OUT, remaining)?;
                Ok(None)
            }
            ControlStage::DataIn => {
                debug!(
                    "Host ended IN data stage of {:#04x} early after {} of {} bytes",
                    t.request.request,
                    t.offset,
                    t.buffer.len()
                );
                self.transfer = None;
                Ok(None)
            }
            ControlStage::StatusOut => {
                if !data.is_empty() {
                    debug!("Status OUT carried {} bytes", data.len());
                }
                trace!("Control transfer {:#04x} complete", t.request.request);
                self.transfer = None;
                Ok(None)
            }
            stage => {
                warn!("Unexpected OUT completion in {:?}", stage);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingTransport;
    use protocol::TransportOp;

    fn get_descriptor(length: u16) -> SetupRequest {
        SetupRequest::parse(&[0x80, 0x06, 0x00, 0x02, 0x00, 0x00, length as u8, (length >> 8) as u8])
            .unwrap()
    }

    fn set_report(length: u16) -> SetupRequest {
        SetupRequest::parse(&[0x21, 0x09, 0x00, 0x02, 0x01, 0x00, length as u8, (length >> 8) as u8])
            .unwrap()
    }

    fn drive_in(pipe: &mut ControlPipe, port: &mut RecordingTransport) {
        while pipe.stage() == ControlStage::DataIn {
            pipe.on_in_complete(port).unwrap();
        }
    }

    #[test]
    fn test_packetizes_in_data() {
        let mut port = RecordingTransport::new();
        port.open_endpoint(EndpointAddress::EP0_IN, protocol::TransferType::Control, 8)
            .unwrap();
        port.open_endpoint(EndpointAddress::EP0_OUT, protocol::TransferType::Control, 8)
            .unwrap();
        let mut pipe = ControlPipe::new(8);

        pipe.send(&mut port, get_descriptor(255), (0..20).collect())
            .unwrap();
        drive_in(&mut pipe, &mut port);

        let packets = port.transmitted(EndpointAddress::EP0_IN);
        assert_eq!(
            packets.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![8, 8, 4]
        );
        assert_eq!(pipe.stage(), ControlStage::StatusOut);
        assert!(matches!(
            port.ops().last(),
            Some(TransportOp::PrepareReceive { max_len: 0, .. })
        ));

        pipe.on_out_complete(&mut port, &[]).unwrap();
        assert_eq!(pipe.stage(), ControlStage::Idle);
    }

    #[test]
    fn test_truncates_to_wlength() {
        let mut port = RecordingTransport::new();
        port.open_endpoint(EndpointAddress::EP0_IN, protocol::TransferType::Control, 64)
            .unwrap();
        let mut pipe = ControlPipe::new(64);

        pipe.send(&mut port, get_descriptor(9), vec![0xAA; 34]).unwrap();
        assert_eq!(port.transmitted(EndpointAddress::EP0_IN), vec![vec![0xAA; 9]]);
    }

    #[test]
    fn test_zlp_on_packet_boundary() {
        let mut port = RecordingTransport::new();
        port.open_endpoint(EndpointAddress::EP0_IN, protocol::TransferType::Control, 8)
            .unwrap();
        port.open_endpoint(EndpointAddress::EP0_OUT, protocol::TransferType::Control, 8)
            .unwrap();
        let mut pipe = ControlPipe::new(8);

        pipe.send(&mut port, get_descriptor(64), vec![1; 16]).unwrap();
        drive_in(&mut pipe, &mut port);
        assert_eq!(
            port.transmitted(EndpointAddress::EP0_IN),
            vec![vec![1; 8], vec![1; 8], vec![]]
        );
    }

    #[test]
    fn test_no_zlp_when_exact_length() {
        let mut port = RecordingTransport::new();
        port.open_endpoint(EndpointAddress::EP0_IN, protocol::TransferType::Control, 8)
            .unwrap();
        port.open_endpoint(EndpointAddress::EP0_OUT, protocol::TransferType::Control, 8)
            .unwrap();
        let mut pipe = ControlPipe::new(8);

        pipe.send(&mut port, get_descriptor(16), vec![1; 16]).unwrap();
        drive_in(&mut pipe, &mut port);
        assert_eq!(port.transmitted(EndpointAddress::EP0_IN).len(), 2);
    }

    #[test]
    fn test_collects_out_payload() {
        let mut port = RecordingTransport::new();
        port.open_endpoint(EndpointAddress::EP0_IN, protocol::TransferType::Control, 8)
            .unwrap();
        port.open_endpoint(EndpointAddress::EP0_OUT, protocol::TransferType::Control, 8)
            .unwrap();
        let mut pipe = ControlPipe::new(8);

        pipe.receive(&mut port, set_report(9)).unwrap();
        assert_eq!(pipe.stage(), ControlStage::DataOut);
        assert!(pipe.on_out_complete(&mut port, &[1; 8]).unwrap().is_none());
        assert!(matches!(
            port.ops().last(),
            Some(TransportOp::PrepareReceive { max_len: 1, .. })
        ));

        let payload = pipe.on_out_complete(&mut port, &[2]).unwrap().unwrap();
        assert_eq!(payload.data.len(), 9);
        assert_eq!(payload.data[8], 2);
        assert_eq!(payload.request.length, 9);

        pipe.finish_out(&mut port).unwrap();
        assert_eq!(pipe.stage(), ControlStage::StatusIn);
        pipe.on_in_complete(&mut port).unwrap();
        assert_eq!(pipe.stage(), ControlStage::Idle);
    }

    #[test]
    fn test_short_packet_ends_out_stage() {
        let mut port = RecordingTransport::new();
        port.open_endpoint(EndpointAddress::EP0_OUT, protocol::TransferType::Control, 8)
            .unwrap();
        let mut pipe = ControlPipe::new(8);

        pipe.receive(&mut port, set_report(20)).unwrap();
        let payload = pipe.on_out_complete(&mut port, &[7; 3]).unwrap().unwrap();
        assert_eq!(payload.data, vec![7; 3]);
    }

    #[test]
    fn test_early_status_out_ends_in_stage() {
        let mut port = RecordingTransport::new();
        port.open_endpoint(EndpointAddress::EP0_IN, protocol::TransferType::Control, 8)
            .unwrap();
        port.open_endpoint(EndpointAddress::EP0_OUT, protocol::TransferType::Control, 8)
            .unwrap();
        let mut pipe = ControlPipe::new(8);

        pipe.send(&mut port, get_descriptor(255), (0..20).collect())
            .unwrap();
        assert_eq!(pipe.stage(), ControlStage::DataIn);

        assert!(pipe.on_out_complete(&mut port, &[]).unwrap().is_none());
        assert_eq!(pipe.stage(), ControlStage::Idle);

        port.take_ops();
        pipe.on_in_complete(&mut port).unwrap();
        assert!(port.ops().is_empty());
    }

    #[test]
    fn test_finish_out_requires_payload() {
        let mut port = RecordingTransport::new();
        let mut pipe = ControlPipe::new(64);
        assert!(pipe.finish_out(&mut port).is_err());
    }

    #[test]
    fn test_stall_and_abort() {
        let mut port = RecordingTransport::new();
        port.open_endpoint(EndpointAddress::EP0_IN, protocol::TransferType::Control, 64)
            .unwrap();
        let mut pipe = ControlPipe::new(64);

        pipe.send(&mut port, get_descriptor(18), vec![0; 18]).unwrap();
        assert!(pipe.abort());
        assert!(!pipe.abort());

        pipe.ack(&mut port, set_report(0)).unwrap();
        pipe.stall(&mut port);
        assert_eq!(pipe.stage(), ControlStage::Idle);
        assert!(port.control_stalled());
    }
}
