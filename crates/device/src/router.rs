//! Composite router
//!
//! Owns the registered logical functions and, while a configuration is
//! active, the interface and endpoint maps that route requests and data
//! events to them. The router itself holds no transfer state; each function
//! keeps its own.

use crate::error::{CompositeError, ControlError, FunctionError, Target};
use crate::function::{ControlOutcome, FunctionPort, LogicalFunction};
use crate::transport::TransportPort;
use protocol::{DeviceSpeed, EndpointAddress, Recipient, SetupRequest};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

struct Slot {
    function: Box<dyn LogicalFunction>,
    interfaces: Vec<u8>,
    endpoints: Vec<EndpointAddress>,
    initialized: bool,
}

impl Slot {
    fn init(&mut self, port: &mut dyn TransportPort, speed: DeviceSpeed) -> Result<(), FunctionError> {
        let mut scoped = FunctionPort::new(port, &self.endpoints);
        self.function.init(&mut scoped, speed)
    }

    fn deinit(&mut self, port: &mut dyn TransportPort) {
        let mut scoped = FunctionPort::new(port, &self.endpoints);
        self.function.deinit(&mut scoped);
        self.initialized = false;
    }
}

/// The functions of a composite device and the routes to them
///
/// Functions are registered before the first reset. They are initialized
/// together on SET_CONFIGURATION and torn down together on reset or
/// configuration 0.
#[derive(Default)]
pub struct CompositeRouter {
    /// Registered functions in registration order
    slots: Vec<Slot>,
    /// Interface number to slot, built at activation, empty otherwise
    interface_map: BTreeMap<u8, usize>,
    /// Endpoint address to slot, built at activation, empty otherwise
    endpoint_map: BTreeMap<EndpointAddress, usize>,
    /// Whether every function is initialized
    active: bool,
}

impl CompositeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function to the composite
    ///
    /// Interface numbers and endpoint addresses must not overlap with any
    /// function registered earlier, and endpoint 0 belongs to the core.
    pub fn register(&mut self, function: Box<dyn LogicalFunction>) -> Result<(), CompositeError> {
        let name = function.name().to_string();
        let interfaces = function.interfaces().to_vec();
        let endpoints: Vec<EndpointAddress> =
            function.endpoints().iter().map(|ep| ep.address).collect();

        if interfaces.is_empty() {
            return Err(CompositeError::NoInterfaces(name));
        }

        for &interface in &interfaces {
            if let Some(owner) = self.slots.iter().find(|s| s.interfaces.contains(&interface)) {
                return Err(CompositeError::InterfaceInUse {
                    interface,
                    owner: owner.function.name().to_string(),
                });
            }
        }

        for (i, &endpoint) in endpoints.iter().enumerate() {
            if endpoint.is_control() {
                return Err(CompositeError::ControlEndpointClaimed(name));
            }
            if !endpoint.is_well_formed() {
                return Err(CompositeError::InvalidEndpoint(endpoint));
            }
            let owner = self
                .slots
                .iter()
                .find(|s| s.endpoints.contains(&endpoint))
                .map(|s| s.function.name().to_string())
                .or_else(|| endpoints[..i].contains(&endpoint).then(|| name.clone()));
            if let Some(owner) = owner {
                return Err(CompositeError::EndpointInUse { endpoint, owner });
            }
        }

        debug!(
            "Registered {} (interfaces {:?}, endpoints {:?})",
            name, interfaces, endpoints
        );
        self.slots.push(Slot {
            function,
            interfaces,
            endpoints,
            initialized: false,
        });
        Ok(())
    }

    pub fn functions(&self) -> impl Iterator<Item = &dyn LogicalFunction> {
        self.slots.iter().map(|s| s.function.as_ref())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total interfaces across all registered functions
    pub fn num_interfaces(&self) -> usize {
        self.slots.iter().map(|s| s.interfaces.len()).sum()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Initialize every function and build the routing maps
    ///
    /// On the first failure, every function touched so far (including the
    /// failing one) is deinitialized in reverse order and the router stays
    /// inactive.
    pub fn activate(
        &mut self,
        port: &mut dyn TransportPort,
        speed: DeviceSpeed,
    ) -> Result<(), ControlError> {
        if self.is_active() {
            self.deactivate(port);
        }

        for i in 0..self.slots.len() {
            let slot = &mut self.slots[i];
            slot.initialized = true;
            if let Err(e) = slot.init(port, speed) {
                let name = slot.function.name().to_string();
                warn!("Init of {} failed: {}; rolling back", name, e);
                for slot in self.slots[..=i].iter_mut().rev() {
                    slot.deinit(port);
                }
                return Err(ControlError::ResourceUnavailable(format!("{}: {}", name, e)));
            }
        }

        for (index, slot) in self.slots.iter().enumerate() {
            for &interface in &slot.interfaces {
                self.interface_map.insert(interface, index);
            }
            for &endpoint in &slot.endpoints {
                self.endpoint_map.insert(endpoint, index);
            }
        }
        self.active = true;
        info!("Activated {} functions", self.slots.len());
        Ok(())
    }

    /// Deinitialize every function and drop the routing maps
    pub fn deactivate(&mut self, port: &mut dyn TransportPort) {
        for slot in self.slots.iter_mut().rev() {
            if slot.initialized {
                slot.deinit(port);
            }
        }
        if self.is_active() {
            info!("Deactivated {} functions", self.slots.len());
        }
        self.interface_map.clear();
        self.endpoint_map.clear();
        self.active = false;
    }

    fn slot_for_interface(&self, interface: u8) -> Result<usize, ControlError> {
        self.interface_map
            .get(&interface)
            .copied()
            .ok_or(ControlError::UnresolvedTarget(Target::Interface(interface)))
    }

    fn slot_for_endpoint(&self, endpoint: EndpointAddress) -> Result<usize, ControlError> {
        self.endpoint_map
            .get(&endpoint)
            .copied()
            .ok_or(ControlError::UnresolvedTarget(Target::Endpoint(endpoint)))
    }

    /// Owning slot for a class or vendor request
    fn slot_for_request(&self, request: &SetupRequest) -> Result<usize, ControlError> {
        match request.recipient() {
            Recipient::Endpoint => self.slot_for_endpoint(EndpointAddress(request.endpoint())),
            Recipient::Interface | Recipient::Device => self.slot_for_interface(request.interface()),
        }
    }

    pub fn owns_endpoint(&self, endpoint: EndpointAddress) -> bool {
        self.endpoint_map.contains_key(&endpoint)
    }

    pub fn owns_interface(&self, interface: u8) -> bool {
        self.interface_map.contains_key(&interface)
    }

    /// Forward a class or vendor request verbatim to the owning function
    pub fn route_class_or_vendor(
        &mut self,
        request: &SetupRequest,
    ) -> Result<ControlOutcome, ControlError> {
        let index = self.slot_for_request(request)?;
        let slot = &mut self.slots[index];
        debug!(
            "Routing request {:#04x} to {}",
            request.request,
            slot.function.name()
        );
        slot.function
            .handle_class_setup(request)
            .map_err(ControlError::from)
    }

    /// Deliver the OUT data stage of a routed request
    pub fn route_control_payload(
        &mut self,
        request: &SetupRequest,
        data: &[u8],
    ) -> Result<(), ControlError> {
        let index = self.slot_for_request(request)?;
        self.slots[index]
            .function
            .handle_control_payload(request, data)
            .map_err(ControlError::from)
    }

    /// String descriptor owned by any registered function
    ///
    /// Strings are answered whether or not the configuration is active; hosts
    /// read interface strings before SET_CONFIGURATION.
    pub fn route_string(&self, index: u8) -> Option<Vec<u8>> {
        self.slots
            .iter()
            .find_map(|s| s.function.string_descriptor(index))
            .map(<[u8]>::to_vec)
    }

    /// Class descriptor (HID, report) for an active interface
    pub fn class_descriptor(
        &self,
        interface: u8,
        descriptor_type: u8,
        index: u8,
    ) -> Result<Vec<u8>, ControlError> {
        let slot = self.slot_for_interface(interface)?;
        self.slots[slot]
            .function
            .class_descriptor(interface, descriptor_type, index)
            .ok_or(ControlError::UnresolvedTarget(Target::Descriptor {
                descriptor_type,
                index,
            }))
    }

    pub fn alternate_setting(&self, interface: u8) -> Result<u8, ControlError> {
        let slot = self.slot_for_interface(interface)?;
        Ok(self.slots[slot].function.alternate_setting(interface))
    }

    pub fn set_alternate_setting(&mut self, interface: u8, alternate: u8) -> Result<(), ControlError> {
        let slot = self.slot_for_interface(interface)?;
        self.slots[slot]
            .function
            .set_alternate_setting(interface, alternate)
            .map_err(ControlError::from)
    }

    /// Route an IN completion on a function endpoint
    pub fn data_in(
        &mut self,
        port: &mut dyn TransportPort,
        endpoint: EndpointAddress,
    ) -> Result<(), ControlError> {
        let index = self.slot_for_endpoint(endpoint)?;
        let slot = &mut self.slots[index];
        let mut scoped = FunctionPort::new(port, &slot.endpoints);
        slot.function
            .handle_data_in(&mut scoped, endpoint)
            .map_err(ControlError::from)
    }

    /// Route an OUT completion on a function endpoint
    pub fn data_out(
        &mut self,
        port: &mut dyn TransportPort,
        endpoint: EndpointAddress,
        data: &[u8],
    ) -> Result<(), ControlError> {
        let index = self.slot_for_endpoint(endpoint)?;
        let slot = &mut self.slots[index];
        let mut scoped = FunctionPort::new(port, &slot.endpoints);
        slot.function
            .handle_data_out(&mut scoped, endpoint, data)
            .map_err(ControlError::from)
    }

    /// Queue application data on the function owning `interface`
    pub fn send(
        &mut self,
        port: &mut dyn TransportPort,
        interface: u8,
        data: &[u8],
    ) -> Result<(), ControlError> {
        let index = self.slot_for_interface(interface)?;
        let slot = &mut self.slots[index];
        let mut scoped = FunctionPort::new(port, &slot.endpoints);
        slot.function
            .send(&mut scoped, data)
            .map_err(ControlError::from)
    }
}
