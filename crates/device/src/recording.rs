//! In-memory transport that records every primitive call
//!
//! Used by tests and by trace replay. Tracks which endpoints are open or
//! stalled and the bus address, and can be told to refuse opening specific
//! endpoints to exercise activation rollback.

use crate::error::TransportError;
use crate::transport::TransportPort;
use protocol::{EndpointAddress, TransferType, TransportOp};
use std::collections::{BTreeMap, BTreeSet};

/// In-memory controller that logs every primitive it is asked to perform
#[derive(Debug, Default)]
pub struct RecordingTransport {
    /// Issued since the last `take_ops`
    ops: Vec<TransportOp>,
    open: BTreeMap<EndpointAddress, u16>,
    stalled: BTreeSet<EndpointAddress>,
    refused: BTreeSet<EndpointAddress>,
    address: u8,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `open_endpoint(endpoint, ..)` fail
    pub fn refuse_endpoint(&mut self, endpoint: EndpointAddress) {
        self.refused.insert(endpoint);
    }

    pub fn ops(&self) -> &[TransportOp] {
        &self.ops
    }

    /// Drain the recorded calls
    pub fn take_ops(&mut self) -> Vec<TransportOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn is_open(&self, endpoint: EndpointAddress) -> bool {
        self.open.contains_key(&endpoint)
    }

    pub fn open_endpoints(&self) -> Vec<EndpointAddress> {
        self.open.keys().copied().collect()
    }

    pub fn is_stalled(&self, endpoint: EndpointAddress) -> bool {
        self.stalled.contains(&endpoint)
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Payloads transmitted on `endpoint`, in order
    pub fn transmitted(&self, endpoint: EndpointAddress) -> Vec<Vec<u8>> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                TransportOp::Transmit { endpoint: ep, data } if *ep == endpoint => {
                    Some(data.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Whether both halves of endpoint 0 were stalled since the last drain
    pub fn control_stalled(&self) -> bool {
        let stalled = |target: EndpointAddress| {
            self.ops
                .iter()
                .any(|op| matches!(op, TransportOp::Stall { endpoint } if *endpoint == target))
        };
        stalled(EndpointAddress::EP0_IN) && stalled(EndpointAddress::EP0_OUT)
    }

    fn require_open(&self, endpoint: EndpointAddress) -> Result<(), TransportError> {
        if self.open.contains_key(&endpoint) {
            Ok(())
        } else {
            Err(TransportError::EndpointNotOpen(endpoint))
        }
    }
}

impl TransportPort for RecordingTransport {
    fn open_endpoint(
        &mut self,
        endpoint: EndpointAddress,
        transfer_type: TransferType,
        max_packet_size: u16,
    ) -> Result<(), TransportError> {
        self.ops.push(TransportOp::OpenEndpoint {
            endpoint,
            transfer_type,
            max_packet_size,
        });
        if self.refused.contains(&endpoint) {
            return Err(TransportError::EndpointUnavailable(endpoint));
        }
        // Re-opening endpoint 0 after a bus reset is expected
        if self.open.contains_key(&endpoint) && !endpoint.is_control() {
            return Err(TransportError::EndpointAlreadyOpen(endpoint));
        }
        self.open.insert(endpoint, max_packet_size);
        self.stalled.remove(&endpoint);
        Ok(())
    }

    fn close_endpoint(&mut self, endpoint: EndpointAddress) -> Result<(), TransportError> {
        self.ops.push(TransportOp::CloseEndpoint { endpoint });
        self.require_open(endpoint)?;
        self.open.remove(&endpoint);
        self.stalled.remove(&endpoint);
        Ok(())
    }

    fn transmit(&mut self, endpoint: EndpointAddress, data: &[u8]) -> Result<(), TransportError> {
        self.ops.push(TransportOp::Transmit {
            endpoint,
            data: data.to_vec(),
        });
        self.require_open(endpoint)
    }

    fn prepare_receive(
        &mut self,
        endpoint: EndpointAddress,
        max_len: u16,
    ) -> Result<(), TransportError> {
        self.ops
            .push(TransportOp::PrepareReceive { endpoint, max_len });
        self.require_open(endpoint)
    }

    fn stall(&mut self, endpoint: EndpointAddress) -> Result<(), TransportError> {
        self.ops.push(TransportOp::Stall { endpoint });
        self.stalled.insert(endpoint);
        Ok(())
    }

    fn clear_stall(&mut self, endpoint: EndpointAddress) -> Result<(), TransportError> {
        self.ops.push(TransportOp::ClearStall { endpoint });
        self.stalled.remove(&endpoint);
        Ok(())
    }

    fn set_address(&mut self, address: u8) -> Result<(), TransportError> {
        self.ops.push(TransportOp::SetAddress { address });
        self.address = address;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_open_endpoints() {
        let mut port = RecordingTransport::new();
        port.open_endpoint(EndpointAddress(0x81), TransferType::Interrupt, 4)
            .unwrap();
        assert!(port.is_open(EndpointAddress(0x81)));
        assert_eq!(
            port.open_endpoint(EndpointAddress(0x81), TransferType::Interrupt, 4),
            Err(TransportError::EndpointAlreadyOpen(EndpointAddress(0x81)))
        );

        port.close_endpoint(EndpointAddress(0x81)).unwrap();
        assert!(port.open_endpoints().is_empty());
        assert_eq!(port.ops().len(), 3);
    }

    #[test]
    fn test_refused_endpoint() {
        let mut port = RecordingTransport::new();
        port.refuse_endpoint(EndpointAddress(0x02));
        assert!(
            port.open_endpoint(EndpointAddress(0x02), TransferType::Interrupt, 9)
                .is_err()
        );
        assert!(!port.is_open(EndpointAddress(0x02)));
    }

    #[test]
    fn test_transmit_requires_open() {
        let mut port = RecordingTransport::new();
        assert!(port.transmit(EndpointAddress(0x81), &[1, 2]).is_err());
        assert_eq!(port.transmitted(EndpointAddress(0x81)), vec![vec![1, 2]]);
    }

    #[test]
    fn test_control_stall_detection() {
        let mut port = RecordingTransport::new();
        port.stall(EndpointAddress::EP0_IN).unwrap();
        assert!(!port.control_stalled());
        port.stall(EndpointAddress::EP0_OUT).unwrap();
        assert!(port.control_stalled());

        port.take_ops();
        assert!(!port.control_stalled());
        assert!(port.is_stalled(EndpointAddress::EP0_IN));
    }
}
