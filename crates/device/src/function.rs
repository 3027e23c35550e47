//! Logical function capability set
//!
//! A logical function is one addressable sub-device of the composite (a
//! mouse, a vendor channel). It owns a disjoint set of interface numbers and
//! endpoint addresses and keeps its own transfer state. Functions only reach
//! the transport through a [`FunctionPort`], which refuses endpoints the
//! function does not own.

use crate::error::FunctionError;
use crate::transport::TransportPort;
use protocol::{DeviceSpeed, EndpointAddress, EndpointConfig, SetupRequest};

/// Result of handling a setup packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Status stage only
    Ack,
    /// IN data stage; the control pipe truncates to wLength
    Send(Vec<u8>),
    /// OUT data stage of wLength bytes, delivered later through
    /// `handle_control_payload`
    Receive,
}

pub trait LogicalFunction: Send {
    fn name(&self) -> &str;

    /// Interface numbers owned by this function
    fn interfaces(&self) -> &[u8];

    /// Endpoints owned by this function, never endpoint 0
    fn endpoints(&self) -> &[EndpointConfig];

    /// Interface, class and endpoint descriptors for the configuration
    /// descriptor at `speed`
    fn configuration_fragment(&self, speed: DeviceSpeed) -> Result<Vec<u8>, FunctionError>;

    /// String descriptor for an index this function owns
    fn string_descriptor(&self, index: u8) -> Option<&[u8]>;

    /// Class-specific descriptor requested with recipient = Interface
    fn class_descriptor(&self, interface: u8, descriptor_type: u8, index: u8) -> Option<Vec<u8>>;

    fn report_descriptor(&self) -> &[u8];

    /// Open endpoints and reset per-function state
    fn init(&mut self, port: &mut FunctionPort<'_>, speed: DeviceSpeed) -> Result<(), FunctionError>;

    /// Close endpoints and drop per-function state. Must tolerate a partial init.
    fn deinit(&mut self, port: &mut FunctionPort<'_>);

    fn handle_class_setup(&mut self, request: &SetupRequest) -> Result<ControlOutcome, FunctionError>;

    /// Transmission on one of this function's IN endpoints completed
    fn handle_data_in(
        &mut self,
        port: &mut FunctionPort<'_>,
        endpoint: EndpointAddress,
    ) -> Result<(), FunctionError>;

    /// Reception on one of this function's OUT endpoints completed
    fn handle_data_out(
        &mut self,
        port: &mut FunctionPort<'_>,
        endpoint: EndpointAddress,
        data: &[u8],
    ) -> Result<(), FunctionError>;

    /// OUT data stage of a class request accepted with [`ControlOutcome::Receive`]
    fn handle_control_payload(
        &mut self,
        request: &SetupRequest,
        data: &[u8],
    ) -> Result<(), FunctionError>;

    /// Queue application data on the function's IN endpoint
    fn send(&mut self, port: &mut FunctionPort<'_>, data: &[u8]) -> Result<(), FunctionError>;

    fn alternate_setting(&self, _interface: u8) -> u8 {
        0
    }

    fn set_alternate_setting(&mut self, interface: u8, alternate: u8) -> Result<(), FunctionError> {
        if alternate == 0 {
            Ok(())
        } else {
            Err(FunctionError::UnsupportedAlternate {
                interface,
                alternate,
            })
        }
    }
}

/// Transport access scoped to the endpoints one function owns
pub struct FunctionPort<'a> {
    port: &'a mut dyn TransportPort,
    owned: &'a [EndpointAddress],
}

impl<'a> FunctionPort<'a> {
    pub fn new(port: &'a mut dyn TransportPort, owned: &'a [EndpointAddress]) -> Self {
        Self { port, owned }
    }

    fn check(&self, endpoint: EndpointAddress) -> Result<(), FunctionError> {
        if self.owned.contains(&endpoint) {
            Ok(())
        } else {
            Err(FunctionError::ForeignEndpoint(endpoint))
        }
    }

    pub fn open(&mut self, endpoint: &EndpointConfig) -> Result<(), FunctionError> {
        self.check(endpoint.address)?;
        self.port
            .open_endpoint(
                endpoint.address,
                endpoint.transfer_type,
                endpoint.max_packet_size,
            )
            .map_err(FunctionError::from)
    }

    pub fn close(&mut self, endpoint: EndpointAddress) -> Result<(), FunctionError> {
        self.check(endpoint)?;
        self.port.close_endpoint(endpoint).map_err(FunctionError::from)
    }

    pub fn transmit(&mut self, endpoint: EndpointAddress, data: &[u8]) -> Result<(), FunctionError> {
        self.check(endpoint)?;
        self.port.transmit(endpoint, data).map_err(FunctionError::from)
    }

    pub fn prepare_receive(
        &mut self,
        endpoint: EndpointAddress,
        max_len: u16,
    ) -> Result<(), FunctionError> {
        self.check(endpoint)?;
        self.port
            .prepare_receive(endpoint, max_len)
            .map_err(FunctionError::from)
    }
}
