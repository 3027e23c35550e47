//! Transport port: the primitives the device core drives
//!
//! The transport owns the physical side (endpoint buffers, packet
//! transmission, the bus address register). It knows nothing about
//! enumeration; the core tells it what to do and receives completion events
//! through [`DeviceSession`](crate::DeviceSession).

use crate::error::TransportError;
use protocol::{EndpointAddress, TransferType};

pub trait TransportPort {
    fn open_endpoint(
        &mut self,
        endpoint: EndpointAddress,
        transfer_type: TransferType,
        max_packet_size: u16,
    ) -> Result<(), TransportError>;

    fn close_endpoint(&mut self, endpoint: EndpointAddress) -> Result<(), TransportError>;

    /// Queue `data` on an IN endpoint. Completion is reported by `on_in_complete`.
    fn transmit(&mut self, endpoint: EndpointAddress, data: &[u8]) -> Result<(), TransportError>;

    /// Arm an OUT endpoint for up to `max_len` bytes. Completion is reported by
    /// `on_out_complete` with the received bytes.
    fn prepare_receive(
        &mut self,
        endpoint: EndpointAddress,
        max_len: u16,
    ) -> Result<(), TransportError>;

    fn stall(&mut self, endpoint: EndpointAddress) -> Result<(), TransportError>;

    fn clear_stall(&mut self, endpoint: EndpointAddress) -> Result<(), TransportError>;

    fn set_address(&mut self, address: u8) -> Result<(), TransportError>;
}
