//! Device session: the event-driven core
//!
//! A [`DeviceSession`] owns the transport, the descriptor catalog, the
//! registered functions and all device-wide state. Every transport event is
//! processed to completion before the call returns; nothing blocks.

use crate::catalog::DescriptorCatalog;
use crate::control::{ControlPayload, ControlPipe, ControlStage};
use crate::error::ControlError;
use crate::function::ControlOutcome;
use crate::router::CompositeRouter;
use crate::state::Enumeration;
use crate::transport::TransportPort;
use protocol::{
    DeviceSpeed, DeviceState, Direction, EndpointAddress, RequestKind, SetupRequest,
    TransferType, TransportEvent,
};
use std::collections::BTreeSet;
use tracing::{debug, error, trace, warn};

/// One USB device as seen from its controller
///
/// Feed it [`TransportEvent`]s through [`DeviceSession::handle_event`] (or the
/// `on_*` entry points); it answers through the transport primitives of `P`.
pub struct DeviceSession<P: TransportPort> {
    /// Controller the session drives
    pub(crate) port: P,
    /// Device-level descriptors and strings
    pub(crate) catalog: Box<dyn DescriptorCatalog>,
    /// Registered logical functions
    pub(crate) router: CompositeRouter,
    /// Default/Addressed/Configured plus address and configuration value
    pub(crate) enumeration: Enumeration,
    /// Endpoint 0 transfer in flight
    pub(crate) control: ControlPipe,
    /// Function endpoints halted by SET_FEATURE(ENDPOINT_HALT)
    pub(crate) halted: BTreeSet<EndpointAddress>,
}

impl<P: TransportPort> DeviceSession<P> {
    /// Assemble a session in the Default state
    ///
    /// Endpoint 0 is opened by the first bus reset.
    pub fn new(port: P, catalog: Box<dyn DescriptorCatalog>, router: CompositeRouter) -> Self {
        let control = ControlPipe::new(catalog.ep0_max_packet_size());
        Self {
            port,
            catalog,
            router,
            enumeration: Enumeration::new(),
            control,
            halted: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.enumeration.state()
    }

    /// Bus address, 0 until SET_ADDRESS
    pub fn address(&self) -> u8 {
        self.enumeration.address()
    }

    /// Active configuration value, 0 when unconfigured
    pub fn configuration(&self) -> u8 {
        self.enumeration.configuration()
    }

    pub fn remote_wakeup(&self) -> bool {
        self.enumeration.remote_wakeup()
    }

    /// Speed reported by the last bus reset
    pub fn speed(&self) -> DeviceSpeed {
        self.enumeration.speed()
    }

    pub fn control_stage(&self) -> ControlStage {
        self.control.stage()
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn router(&self) -> &CompositeRouter {
        &self.router
    }

    pub fn is_halted(&self, endpoint: EndpointAddress) -> bool {
        self.halted.contains(&endpoint)
    }

    /// Dispatch one transport event
    pub fn handle_event(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::Reset { speed } => self.reset(*speed),
            TransportEvent::Setup { packet } => self.on_setup(packet),
            TransportEvent::InComplete { endpoint } => self.on_in_complete(*endpoint),
            TransportEvent::OutComplete { endpoint, data } => self.on_out_complete(*endpoint, data),
        }
    }

    /// Bus reset: tear everything down and reopen endpoint 0
    pub fn reset(&mut self, speed: DeviceSpeed) {
        self.router.deactivate(&mut self.port);
        self.control.reset();
        self.halted.clear();

        if self.enumeration.address() != 0 {
            if let Err(e) = self.port.set_address(0) {
                error!("Failed to clear bus address: {}", e);
            }
        }
        self.enumeration.reset(speed);

        let mps = self.catalog.ep0_max_packet_size();
        self.control.set_max_packet_size(mps);
        for endpoint in [EndpointAddress::EP0_OUT, EndpointAddress::EP0_IN] {
            if let Err(e) = self
                .port
                .open_endpoint(endpoint, TransferType::Control, u16::from(mps))
            {
                error!("Failed to open {}: {}", endpoint, e);
            }
        }
    }

    /// A setup packet arrived on endpoint 0
    pub fn on_setup(&mut self, packet: &[u8]) {
        self.control.abort();

        let request = match SetupRequest::parse(packet) {
            Ok(request) => request,
            Err(e) => {
                warn!("Stalling undecodable setup packet: {}", e);
                self.control.stall(&mut self.port);
                return;
            }
        };
        trace!(
            "Setup type={:#04x} request={:#04x} value={:#06x} index={:#06x} length={}",
            request.request_type.to_u8(),
            request.request,
            request.value,
            request.index,
            request.length
        );

        let result = self
            .dispatch(&request)
            .and_then(|outcome| self.start_transfer(request, outcome));
        if let Err(e) = result {
            self.stall_request(&request, &e);
        }
    }

    /// A transmission completed on an IN endpoint
    pub fn on_in_complete(&mut self, endpoint: EndpointAddress) {
        if endpoint.is_control() {
            if let Err(e) = self.control.on_in_complete(&mut self.port) {
                warn!("Control IN stage failed: {}", e);
                self.control.stall(&mut self.port);
            }
            return;
        }
        if !self.enumeration.is_configured() {
            warn!("Ignoring IN completion on {} while {}", endpoint, self.state());
            return;
        }
        if let Err(e) = self.router.data_in(&mut self.port, endpoint) {
            warn!("IN completion on {}: {}", endpoint, e);
        }
    }

    /// A reception completed on an OUT endpoint
    pub fn on_out_complete(&mut self, endpoint: EndpointAddress, data: &[u8]) {
        if endpoint.is_control() {
            match self.control.on_out_complete(&mut self.port, data) {
                Ok(Some(payload)) => self.complete_payload(payload),
                Ok(None) => {}
                Err(e) => {
                    warn!("Control OUT stage failed: {}", e);
                    self.control.stall(&mut self.port);
                }
            }
            return;
        }
        if !self.enumeration.is_configured() {
            warn!("Ignoring OUT completion on {} while {}", endpoint, self.state());
            return;
        }
        if let Err(e) = self.router.data_out(&mut self.port, endpoint, data) {
            warn!("OUT completion on {}: {}", endpoint, e);
        }
    }

    /// Queue an input report on the function owning `interface`
    pub fn send_report(&mut self, interface: u8, data: &[u8]) -> Result<(), ControlError> {
        self.enumeration.require_configured("send_report")?;
        self.router.send(&mut self.port, interface, data)
    }

    fn dispatch(&mut self, request: &SetupRequest) -> Result<ControlOutcome, ControlError> {
        match request.kind() {
            RequestKind::Standard => self.handle_standard(request),
            RequestKind::Class | RequestKind::Vendor => self.router.route_class_or_vendor(request),
        }
    }

    /// Turn a handler outcome into the matching control transfer
    fn start_transfer(
        &mut self,
        request: SetupRequest,
        outcome: ControlOutcome,
    ) -> Result<(), ControlError> {
        let direction = request.direction();
        match outcome {
            ControlOutcome::Ack if request.length == 0 => self.control.ack(&mut self.port, request),
            // Nothing to report but the host expects a data stage
            ControlOutcome::Ack if direction == Direction::DeviceToHost => {
                self.control.send(&mut self.port, request, Vec::new())
            }
            ControlOutcome::Ack => Err(ControlError::MalformedRequest(
                "OUT data stage left unread",
            )),
            ControlOutcome::Send(_) if direction != Direction::DeviceToHost => Err(
                ControlError::MalformedRequest("IN data for a host-to-device request"),
            ),
            ControlOutcome::Send(_) if request.length == 0 => {
                self.control.ack(&mut self.port, request)
            }
            ControlOutcome::Send(data) => self.control.send(&mut self.port, request, data),
            ControlOutcome::Receive if direction != Direction::HostToDevice => Err(
                ControlError::MalformedRequest("OUT data for a device-to-host request"),
            ),
            ControlOutcome::Receive if request.length == 0 => {
                self.deliver_payload(&request, &[])?;
                self.control.ack(&mut self.port, request)
            }
            ControlOutcome::Receive => self.control.receive(&mut self.port, request),
        }
    }

    fn complete_payload(&mut self, payload: ControlPayload) {
        let result = self
            .deliver_payload(&payload.request, &payload.data)
            .and_then(|_| self.control.finish_out(&mut self.port));
        if let Err(e) = result {
            self.stall_request(&payload.request, &e);
        }
    }

    /// Hand a completed OUT data stage to whoever accepted the request
    fn deliver_payload(&mut self, request: &SetupRequest, data: &[u8]) -> Result<(), ControlError> {
        match request.kind() {
            RequestKind::Class | RequestKind::Vendor => {
                debug!("Delivering {} byte payload for {:#04x}", data.len(), request.request);
                self.router.route_control_payload(request, data)
            }
            // No standard request accepted here takes a data stage
            RequestKind::Standard => Err(ControlError::UnknownRequest {
                request: request.request,
            }),
        }
    }

    fn stall_request(&mut self, request: &SetupRequest, cause: &ControlError) {
        warn!(
            "Stalling request {:#04x} (type {:#04x}): {}",
            request.request,
            request.request_type.to_u8(),
            cause
        );
        self.control.stall(&mut self.port);
    }
}
