//! Generic HID logical function
//!
//! One implementation serves every HID-style sub-device of the composite.
//! Instances differ only in their [`HidFunctionConfig`] (interface number,
//! endpoints, report descriptor, strings) and in the [`ReportHandler`] that
//! gives reports their meaning.

use crate::error::FunctionError;
use crate::function::{ControlOutcome, FunctionPort, LogicalFunction};
use protocol::descriptor::{InterfaceDescriptor, encode_string_descriptor, write_endpoint};
use protocol::hid::{self, HidRequest, ReportType, hid_descriptor};
use protocol::{
    DescriptorType, DeviceSpeed, EndpointAddress, EndpointConfig, Recipient, RequestKind,
    SetupRequest,
};
use tracing::{debug, trace, warn};

/// HID boot/report protocol selector (SET_PROTOCOL wValue)
pub const PROTOCOL_BOOT: u8 = 0;
pub const PROTOCOL_REPORT: u8 = 1;

/// Callbacks that give one HID instance its behaviour
pub trait ReportHandler: Send {
    fn on_init(&mut self) -> Result<(), FunctionError> {
        Ok(())
    }

    fn on_deinit(&mut self) {}

    /// Report received on the interrupt OUT endpoint
    fn on_output_report(&mut self, _data: &[u8]) -> Result<(), FunctionError> {
        Ok(())
    }

    /// Payload of a SET_REPORT control transfer
    fn on_set_report(
        &mut self,
        _report_type: ReportType,
        _report_id: u8,
        _data: &[u8],
    ) -> Result<(), FunctionError> {
        Ok(())
    }

    /// Reply to GET_REPORT; `None` stalls the request
    fn get_report(&mut self, _report_type: ReportType, _report_id: u8) -> Option<Vec<u8>> {
        None
    }

    /// The last report queued on the IN endpoint reached the host
    fn on_report_sent(&mut self) {}
}

/// Handler that accepts and discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHandler;

impl ReportHandler for NullHandler {}

/// Static shape of one HID instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidFunctionConfig {
    pub name: String,
    pub interface: u8,
    pub subclass: u8,
    pub protocol: u8,
    /// iInterface and its text
    pub string_index: u8,
    pub string: String,
    pub report_descriptor: Vec<u8>,
    pub in_endpoint: EndpointConfig,
    pub out_endpoint: Option<EndpointConfig>,
}

/// One HID interface with an interrupt IN endpoint and optional OUT endpoint
///
/// Class requests and data events are forwarded to `H`.
pub struct HidFunction<H: ReportHandler> {
    config: HidFunctionConfig,
    handler: H,
    interfaces: [u8; 1],
    endpoints: Vec<EndpointConfig>,
    string_descriptor: Vec<u8>,
    hid_descriptor: [u8; hid::HID_DESCRIPTOR_LEN],
    state: HidState,
}

/// Per-instance transfer state, reset on every init
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct HidState {
    active: bool,
    in_busy: bool,
    idle_rate: u8,
    protocol: u8,
    opened: Vec<EndpointAddress>,
}

impl<H: ReportHandler> HidFunction<H> {
    pub fn new(config: HidFunctionConfig, handler: H) -> Result<Self, FunctionError> {
        let string_descriptor = encode_string_descriptor(&config.string)?;
        let hid_descriptor = hid_descriptor(config.report_descriptor.len())?;

        let mut endpoints = vec![config.in_endpoint];
        endpoints.extend(config.out_endpoint);

        Ok(Self {
            interfaces: [config.interface],
            endpoints,
            string_descriptor,
            hid_descriptor,
            config,
            handler,
            state: HidState::default(),
        })
    }

    pub fn config(&self) -> &HidFunctionConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    /// Whether a report is in flight on the IN endpoint
    pub fn is_busy(&self) -> bool {
        self.state.in_busy
    }

    pub fn idle_rate(&self) -> u8 {
        self.state.idle_rate
    }

    pub fn protocol(&self) -> u8 {
        self.state.protocol
    }

    fn in_address(&self) -> EndpointAddress {
        self.config.in_endpoint.address
    }

    fn out_endpoint(&self) -> Option<&EndpointConfig> {
        self.config.out_endpoint.as_ref()
    }

    fn arm_out(&self, port: &mut FunctionPort<'_>) -> Result<(), FunctionError> {
        if let Some(out) = self.out_endpoint() {
            port.prepare_receive(out.address, out.max_packet_size)?;
        }
        Ok(())
    }
}

impl<H: ReportHandler> LogicalFunction for HidFunction<H> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn interfaces(&self) -> &[u8] {
        &self.interfaces
    }

    fn endpoints(&self) -> &[EndpointConfig] {
        &self.endpoints
    }

    fn configuration_fragment(&self, speed: DeviceSpeed) -> Result<Vec<u8>, FunctionError> {
        let mut out = Vec::new();
        InterfaceDescriptor {
            number: self.config.interface,
            alternate_setting: 0,
            num_endpoints: self.endpoints.len() as u8,
            class: hid::HID_CLASS,
            subclass: self.config.subclass,
            protocol: self.config.protocol,
            string_index: self.config.string_index,
        }
        .write_to(&mut out);
        out.extend_from_slice(&self.hid_descriptor);
        for endpoint in &self.endpoints {
            write_endpoint(&mut out, endpoint, speed);
        }
        Ok(out)
    }

    fn string_descriptor(&self, index: u8) -> Option<&[u8]> {
        (index == self.config.string_index).then_some(self.string_descriptor.as_slice())
    }

    fn class_descriptor(&self, interface: u8, descriptor_type: u8, _index: u8) -> Option<Vec<u8>> {
        if interface != self.config.interface {
            return None;
        }
        match DescriptorType::from_u8(descriptor_type)? {
            DescriptorType::Hid => Some(self.hid_descriptor.to_vec()),
            DescriptorType::Report => Some(self.config.report_descriptor.clone()),
            _ => None,
        }
    }

    fn report_descriptor(&self) -> &[u8] {
        &self.config.report_descriptor
    }

    fn init(&mut self, port: &mut FunctionPort<'_>, speed: DeviceSpeed) -> Result<(), FunctionError> {
        self.state = HidState {
            protocol: PROTOCOL_REPORT,
            ..HidState::default()
        };

        for endpoint in &self.endpoints {
            port.open(endpoint)?;
            self.state.opened.push(endpoint.address);
        }
        self.arm_out(port)?;
        self.handler.on_init()?;

        self.state.active = true;
        debug!("{} initialized at {:?} speed", self.config.name, speed);
        Ok(())
    }

    fn deinit(&mut self, port: &mut FunctionPort<'_>) {
        for endpoint in std::mem::take(&mut self.state.opened) {
            if let Err(e) = port.close(endpoint) {
                warn!("{}: closing {} failed: {}", self.config.name, endpoint, e);
            }
        }
        if self.state.active {
            self.handler.on_deinit();
        }
        self.state = HidState::default();
        debug!("{} deinitialized", self.config.name);
    }

    fn handle_class_setup(&mut self, request: &SetupRequest) -> Result<ControlOutcome, FunctionError> {
        if request.kind() != RequestKind::Class || request.recipient() != Recipient::Interface {
            return Err(FunctionError::UnsupportedRequest(request.request));
        }
        let report_id = request.descriptor_index();

        match HidRequest::from_u8(request.request) {
            Some(HidRequest::SetIdle) => {
                self.state.idle_rate = (request.value >> 8) as u8;
                trace!("{}: idle rate {}", self.config.name, self.state.idle_rate);
                Ok(ControlOutcome::Ack)
            }
            Some(HidRequest::GetIdle) => Ok(ControlOutcome::Send(vec![self.state.idle_rate])),
            Some(HidRequest::SetProtocol) => {
                let protocol = (request.value & 0xFF) as u8;
                if protocol > PROTOCOL_REPORT {
                    return Err(FunctionError::Rejected(format!(
                        "unknown protocol {}",
                        protocol
                    )));
                }
                self.state.protocol = protocol;
                Ok(ControlOutcome::Ack)
            }
            Some(HidRequest::GetProtocol) => Ok(ControlOutcome::Send(vec![self.state.protocol])),
            Some(HidRequest::SetReport) => Ok(ControlOutcome::Receive),
            Some(HidRequest::GetReport) => {
                let report_type = ReportType::from_u8(request.descriptor_type())
                    .ok_or(FunctionError::UnsupportedRequest(request.request))?;
                self.handler
                    .get_report(report_type, report_id)
                    .map(ControlOutcome::Send)
                    .ok_or(FunctionError::UnsupportedRequest(request.request))
            }
            None => Err(FunctionError::UnsupportedRequest(request.request)),
        }
    }

    fn handle_data_in(
        &mut self,
        _port: &mut FunctionPort<'_>,
        endpoint: EndpointAddress,
    ) -> Result<(), FunctionError> {
        if endpoint != self.in_address() {
            return Err(FunctionError::ForeignEndpoint(endpoint));
        }
        self.state.in_busy = false;
        self.handler.on_report_sent();
        Ok(())
    }

    fn handle_data_out(
        &mut self,
        port: &mut FunctionPort<'_>,
        endpoint: EndpointAddress,
        data: &[u8],
    ) -> Result<(), FunctionError> {
        if self.out_endpoint().map(|ep| ep.address) != Some(endpoint) {
            return Err(FunctionError::ForeignEndpoint(endpoint));
        }
        let result = self.handler.on_output_report(data);
        // The endpoint is re-armed even when the handler rejects the report
        self.arm_out(port)?;
        result
    }

    fn handle_control_payload(
        &mut self,
        request: &SetupRequest,
        data: &[u8],
    ) -> Result<(), FunctionError> {
        match HidRequest::from_u8(request.request) {
            Some(HidRequest::SetReport) => {
                let report_type = ReportType::from_u8(request.descriptor_type())
                    .ok_or(FunctionError::UnsupportedRequest(request.request))?;
                self.handler
                    .on_set_report(report_type, request.descriptor_index(), data)
            }
            _ => Err(FunctionError::UnsupportedRequest(request.request)),
        }
    }

    fn send(&mut self, port: &mut FunctionPort<'_>, data: &[u8]) -> Result<(), FunctionError> {
        if !self.state.active {
            return Err(FunctionError::NotActive);
        }
        let endpoint = self.config.in_endpoint;
        if self.state.in_busy {
            return Err(FunctionError::Busy(endpoint.address));
        }
        if data.len() > endpoint.max_packet_size as usize {
            return Err(FunctionError::PayloadTooLarge {
                len: data.len(),
                max: endpoint.max_packet_size as usize,
            });
        }

        port.transmit(endpoint.address, data)?;
        self.state.in_busy = true;
        Ok(())
    }
}
