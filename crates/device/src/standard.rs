//! Standard (chapter 9) request handlers

use crate::error::{ControlError, Target};
use crate::function::ControlOutcome;
use crate::resolve::resolve_descriptor;
use crate::session::DeviceSession;
use crate::transport::TransportPort;
use protocol::requests::{STATUS_HALTED, STATUS_REMOTE_WAKEUP, STATUS_SELF_POWERED};
use protocol::{
    DeviceState, Direction, EndpointAddress, Recipient, SetupRequest, StandardRequest, feature,
};
use tracing::{debug, info};

fn expect_in(request: &SetupRequest, length: Option<u16>) -> Result<(), ControlError> {
    if request.direction() != Direction::DeviceToHost {
        return Err(ControlError::MalformedRequest("expected device-to-host request"));
    }
    match length {
        Some(expected) if request.length != expected => {
            Err(ControlError::MalformedRequest("unexpected wLength"))
        }
        _ => Ok(()),
    }
}

fn expect_no_data(request: &SetupRequest) -> Result<(), ControlError> {
    if request.direction() != Direction::HostToDevice || request.length != 0 {
        return Err(ControlError::MalformedRequest(
            "expected host-to-device request without data stage",
        ));
    }
    Ok(())
}

impl<P: TransportPort> DeviceSession<P> {
    pub(crate) fn handle_standard(
        &mut self,
        request: &SetupRequest,
    ) -> Result<ControlOutcome, ControlError> {
        let Some(code) = StandardRequest::from_u8(request.request) else {
            return Err(ControlError::UnknownRequest {
                request: request.request,
            });
        };
        debug!("Standard {:?} to {:?}", code, request.recipient());

        use StandardRequest::*;
        match (request.recipient(), code) {
            (_, GetDescriptor) => self.get_descriptor(request),
            (Recipient::Device, GetStatus) => self.device_status(request),
            (Recipient::Device, SetFeature) => self.device_feature(request, true),
            (Recipient::Device, ClearFeature) => self.device_feature(request, false),
            (Recipient::Device, SetAddress) => self.set_address(request),
            (Recipient::Device, GetConfiguration) => self.get_configuration(request),
            (Recipient::Device, SetConfiguration) => self.set_configuration(request),
            (Recipient::Interface, GetStatus) => self.interface_status(request),
            (Recipient::Interface, GetInterface) => self.get_interface(request),
            (Recipient::Interface, SetInterface) => self.set_interface(request),
            (Recipient::Interface, SetFeature | ClearFeature) => Err(
                ControlError::MalformedRequest("no interface feature selectors defined"),
            ),
            (Recipient::Endpoint, GetStatus) => self.endpoint_status(request),
            (Recipient::Endpoint, SetFeature) => self.endpoint_feature(request, true),
            (Recipient::Endpoint, ClearFeature) => self.endpoint_feature(request, false),
            _ => Err(ControlError::UnknownRequest {
                request: request.request,
            }),
        }
    }

    fn get_descriptor(&mut self, request: &SetupRequest) -> Result<ControlOutcome, ControlError> {
        expect_in(request, None)?;
        if request.length == 0 {
            return Ok(ControlOutcome::Ack);
        }

        let descriptor_type = request.descriptor_type();
        let index = request.descriptor_index();
        let bytes = match request.recipient() {
            Recipient::Device => resolve_descriptor(
                self.catalog.as_ref(),
                &self.router,
                request,
                self.enumeration.speed(),
            )?,
            Recipient::Interface => {
                self.router
                    .class_descriptor(request.interface(), descriptor_type, index)?
            }
            Recipient::Endpoint => {
                return Err(ControlError::UnresolvedTarget(Target::Descriptor {
                    descriptor_type,
                    index,
                }));
            }
        };

        if bytes.is_empty() {
            return Err(ControlError::UnresolvedTarget(Target::Descriptor {
                descriptor_type,
                index,
            }));
        }
        Ok(ControlOutcome::Send(bytes))
    }

    fn device_status(&self, request: &SetupRequest) -> Result<ControlOutcome, ControlError> {
        expect_in(request, Some(2))?;
        let mut status = 0;
        if self.catalog.self_powered() {
            status |= STATUS_SELF_POWERED;
        }
        if self.enumeration.remote_wakeup() {
            status |= STATUS_REMOTE_WAKEUP;
        }
        Ok(ControlOutcome::Send(vec![status, 0]))
    }

    fn device_feature(
        &mut self,
        request: &SetupRequest,
        set: bool,
    ) -> Result<ControlOutcome, ControlError> {
        expect_no_data(request)?;
        match request.value {
            feature::DEVICE_REMOTE_WAKEUP => {
                self.enumeration.set_remote_wakeup(set);
                debug!("Remote wakeup {}", if set { "enabled" } else { "disabled" });
                Ok(ControlOutcome::Ack)
            }
            feature::TEST_MODE => Err(ControlError::ResourceUnavailable(
                "test mode not supported".into(),
            )),
            _ => Err(ControlError::MalformedRequest("unknown device feature selector")),
        }
    }

    fn set_address(&mut self, request: &SetupRequest) -> Result<ControlOutcome, ControlError> {
        expect_no_data(request)?;
        if request.index != 0 {
            return Err(ControlError::MalformedRequest("SET_ADDRESS with nonzero wIndex"));
        }
        let address = self.enumeration.check_set_address(request.value)?;
        self.port.set_address(address)?;
        self.enumeration.set_address(address);
        Ok(ControlOutcome::Ack)
    }

    fn get_configuration(&self, request: &SetupRequest) -> Result<ControlOutcome, ControlError> {
        expect_in(request, Some(1))?;
        Ok(ControlOutcome::Send(vec![self.enumeration.configuration()]))
    }

    fn set_configuration(&mut self, request: &SetupRequest) -> Result<ControlOutcome, ControlError> {
        expect_no_data(request)?;
        let value = u8::try_from(request.value)
            .map_err(|_| ControlError::MalformedRequest("configuration value above 255"))?;
        if value > self.catalog.num_configurations() {
            return Err(ControlError::UnresolvedTarget(Target::Configuration(value)));
        }
        self.enumeration.check_set_configuration()?;

        if value == 0 {
            self.deconfigure();
            return Ok(ControlOutcome::Ack);
        }
        if self.enumeration.is_configured() && self.enumeration.configuration() == value {
            debug!("Configuration {} already active", value);
            return Ok(ControlOutcome::Ack);
        }

        self.deconfigure();
        let speed = self.enumeration.speed();
        self.router.activate(&mut self.port, speed)?;
        self.enumeration.configure(value);
        Ok(ControlOutcome::Ack)
    }

    /// Drop the active configuration, if any, and return to Addressed
    fn deconfigure(&mut self) {
        if self.router.is_active() {
            self.router.deactivate(&mut self.port);
        }
        self.halted.clear();
        self.enumeration.unconfigure();
    }

    fn interface_status(&self, request: &SetupRequest) -> Result<ControlOutcome, ControlError> {
        expect_in(request, Some(2))?;
        self.enumeration.require_configured("GET_STATUS(interface)")?;
        let interface = request.interface();
        if !self.router.owns_interface(interface) {
            return Err(ControlError::UnresolvedTarget(Target::Interface(interface)));
        }
        Ok(ControlOutcome::Send(vec![0, 0]))
    }

    fn get_interface(&self, request: &SetupRequest) -> Result<ControlOutcome, ControlError> {
        expect_in(request, Some(1))?;
        self.enumeration.require_configured("GET_INTERFACE")?;
        let alternate = self.router.alternate_setting(request.interface())?;
        Ok(ControlOutcome::Send(vec![alternate]))
    }

    fn set_interface(&mut self, request: &SetupRequest) -> Result<ControlOutcome, ControlError> {
        expect_no_data(request)?;
        self.enumeration.require_configured("SET_INTERFACE")?;
        let alternate = u8::try_from(request.value)
            .map_err(|_| ControlError::MalformedRequest("alternate setting above 255"))?;
        self.router
            .set_alternate_setting(request.interface(), alternate)?;
        Ok(ControlOutcome::Ack)
    }

    /// Endpoint addressed by an endpoint-recipient request, if valid now
    ///
    /// Addressed: endpoint 0 only. Configured: endpoint 0 or a function endpoint.
    fn endpoint_target(&self, request: &SetupRequest) -> Result<EndpointAddress, ControlError> {
        if request.index > 0xFF {
            return Err(ControlError::MalformedRequest("endpoint wIndex high byte set"));
        }
        let endpoint = EndpointAddress(request.endpoint());
        match self.enumeration.state() {
            DeviceState::Default => Err(ControlError::InvalidStateTransition {
                state: DeviceState::Default,
                request: "endpoint request",
            }),
            DeviceState::Addressed if endpoint.is_control() => Ok(endpoint),
            DeviceState::Configured
                if endpoint.is_control() || self.router.owns_endpoint(endpoint) =>
            {
                Ok(endpoint)
            }
            _ => Err(ControlError::UnresolvedTarget(Target::Endpoint(endpoint))),
        }
    }

    fn endpoint_status(&self, request: &SetupRequest) -> Result<ControlOutcome, ControlError> {
        expect_in(request, Some(2))?;
        let endpoint = self.endpoint_target(request)?;
        let status = if self.halted.contains(&endpoint) {
            STATUS_HALTED
        } else {
            0
        };
        Ok(ControlOutcome::Send(vec![status, 0]))
    }

    fn endpoint_feature(
        &mut self,
        request: &SetupRequest,
        set: bool,
    ) -> Result<ControlOutcome, ControlError> {
        expect_no_data(request)?;
        if request.value != feature::ENDPOINT_HALT {
            return Err(ControlError::MalformedRequest("unknown endpoint feature selector"));
        }
        let endpoint = self.endpoint_target(request)?;
        if endpoint.is_control() {
            return Ok(ControlOutcome::Ack);
        }

        if set {
            self.port.stall(endpoint)?;
            self.halted.insert(endpoint);
            info!("Endpoint {} halted", endpoint);
        } else {
            self.port.clear_stall(endpoint)?;
            self.halted.remove(&endpoint);
            info!("Endpoint {} resumed", endpoint);
        }
        Ok(ControlOutcome::Ack)
    }
}
