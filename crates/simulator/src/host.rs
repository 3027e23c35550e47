//! Emulated USB host
//!
//! Drives the device over the [`DeviceBridge`] the way a host controller
//! would: it issues SETUP packets and acknowledges every packet the device
//! puts on the bus, following the transport primitives each event produced.

use anyhow::{Context, Result, anyhow, bail};
use common::{DeviceBridge, DeviceNotice, SessionSnapshot};
use protocol::descriptor::{DescriptorIter, decode_string_descriptor};
use protocol::hid::ReportType;
use protocol::{
    DescriptorType, DeviceSpeed, EndpointAddress, Recipient, SetupRequest, TransportEvent,
    TransportOp, hid,
};
use std::fmt;
use tracing::{debug, info, warn};

/// Upper bound on bus round trips for one control transfer
const MAX_STAGE_ROUNDS: usize = 4096;

/// String index no device in this workspace serves
const UNKNOWN_STRING_INDEX: u8 = 0xEE;

/// Outcome of a control transfer as seen by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status stage completed; IN transfers carry their data stage
    Data(Vec<u8>),
    /// The device stalled endpoint 0
    Stall,
}

impl Reply {
    pub fn is_stall(&self) -> bool {
        matches!(self, Reply::Stall)
    }

    /// Data of a completed transfer, or an error naming the request
    pub fn expect_data(self, what: &str) -> Result<Vec<u8>> {
        match self {
            Reply::Data(data) => Ok(data),
            Reply::Stall => Err(anyhow!("{} stalled", what)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSummary {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub string_index: u8,
    pub endpoints: Vec<EndpointAddress>,
    /// wDescriptorLength announced by the HID class descriptor
    pub report_len: Option<u16>,
    pub report_descriptor: Option<Vec<u8>>,
}

impl InterfaceSummary {
    fn is_hid(&self) -> bool {
        self.class == hid::HID_CLASS
    }

    fn in_endpoint(&self) -> Option<EndpointAddress> {
        self.endpoints.iter().copied().find(|ep| ep.is_in())
    }

    fn out_endpoint(&self) -> Option<EndpointAddress> {
        self.endpoints.iter().copied().find(|ep| !ep.is_in())
    }
}

/// What the host learned while enumerating
#[derive(Debug, Clone, Default)]
pub struct EnumerationSummary {
    pub speed: DeviceSpeed,
    pub vendor_id: u16,
    pub product_id: u16,
    pub usb_version: u16,
    pub max_packet_size0: u8,
    pub configuration_value: u8,
    pub configuration_len: usize,
    pub self_powered: bool,
    pub qualifier: bool,
    pub strings: Vec<(u8, String)>,
    pub interfaces: Vec<InterfaceSummary>,
    pub unknown_string_stalled: bool,
    pub set_reports: usize,
    pub reports_sent: usize,
    pub notices: Vec<DeviceNotice>,
    pub snapshot: SessionSnapshot,
}

impl EnumerationSummary {
    pub fn string(&self, index: u8) -> Option<&str> {
        self.strings
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, s)| s.as_str())
    }
}

impl fmt::Display for EnumerationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Device {:04x}:{:04x} USB {:x}.{:02x} at {:?} speed, EP0 {} bytes",
            self.vendor_id,
            self.product_id,
            self.usb_version >> 8,
            self.usb_version & 0xFF,
            self.speed,
            self.max_packet_size0
        )?;
        writeln!(
            f,
            "  State: {} (address {}, configuration {})",
            self.snapshot.state, self.snapshot.address, self.snapshot.configuration
        )?;
        writeln!(
            f,
            "  Configuration {}: {} bytes, {}, qualifier {}",
            self.configuration_value,
            self.configuration_len,
            if self.self_powered { "self-powered" } else { "bus-powered" },
            if self.qualifier { "present" } else { "absent" }
        )?;
        for (index, text) in &self.strings {
            writeln!(f, "  String {}: {:?}", index, text)?;
        }
        for interface in &self.interfaces {
            let endpoints: Vec<String> = interface.endpoints.iter().map(|ep| ep.to_string()).collect();
            writeln!(
                f,
                "  Interface {}: class {:#04x}/{:#04x}/{:#04x} endpoints [{}] report descriptor {}",
                interface.number,
                interface.class,
                interface.subclass,
                interface.protocol,
                endpoints.join(", "),
                interface
                    .report_descriptor
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |r| format!("{} bytes", r.len()))
            )?;
        }
        writeln!(
            f,
            "  Unknown string {:#04x}: {}",
            UNKNOWN_STRING_INDEX,
            if self.unknown_string_stalled { "stalled" } else { "answered" }
        )?;
        writeln!(
            f,
            "  SET_REPORT accepted: {}, input reports sent: {}",
            self.set_reports, self.reports_sent
        )?;
        for notice in &self.notices {
            writeln!(f, "  Notice: {:?}", notice)?;
        }
        Ok(())
    }
}

pub struct HostEmulator {
    bridge: DeviceBridge,
}

impl HostEmulator {
    pub fn new(bridge: DeviceBridge) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &DeviceBridge {
        &self.bridge
    }

    pub async fn reset(&mut self, speed: DeviceSpeed) -> Result<Vec<TransportOp>> {
        info!("Bus reset at {:?} speed", speed);
        self.deliver(TransportEvent::Reset { speed }).await
    }

    /// Run a control transfer with an IN (or empty) data stage
    pub async fn control_in(&mut self, request: SetupRequest) -> Result<Reply> {
        let length = request.length;
        let packet = request.to_bytes();
        let mut ops = self.deliver(TransportEvent::Setup { packet }).await?;
        let mut data = Vec::new();

        for _ in 0..MAX_STAGE_ROUNDS {
            if control_stalled(&ops) {
                return Ok(Reply::Stall);
            }

            let mut sent_packet = false;
            let mut status_armed = false;
            for op in &ops {
                match op {
                    TransportOp::Transmit { endpoint, data: packet }
                        if *endpoint == EndpointAddress::EP0_IN =>
                    {
                        data.extend_from_slice(packet);
                        sent_packet = true;
                    }
                    TransportOp::PrepareReceive { endpoint, .. }
                        if *endpoint == EndpointAddress::EP0_OUT =>
                    {
                        status_armed = true;
                    }
                    _ => {}
                }
            }

            if status_armed {
                let ops = self
                    .deliver(TransportEvent::OutComplete {
                        endpoint: EndpointAddress::EP0_OUT,
                        data: Vec::new(),
                    })
                    .await?;
                if control_stalled(&ops) {
                    return Ok(Reply::Stall);
                }
                return Ok(Reply::Data(data));
            }
            if !sent_packet {
                bail!("Device went silent during an IN control transfer");
            }

            ops = self
                .deliver(TransportEvent::InComplete {
                    endpoint: EndpointAddress::EP0_IN,
                })
                .await?;

            // With no data stage the ZLP just acknowledged was the status stage
            if length == 0 {
                return Ok(if control_stalled(&ops) {
                    Reply::Stall
                } else {
                    Reply::Data(Vec::new())
                });
            }
        }

        bail!("Control transfer did not finish")
    }

    /// Run a control transfer with an OUT (or empty) data stage
    pub async fn control_out(&mut self, request: SetupRequest, data: &[u8]) -> Result<Reply> {
        let packet = request.to_bytes();
        let mut ops = self.deliver(TransportEvent::Setup { packet }).await?;
        let mut offset = 0;

        for _ in 0..MAX_STAGE_ROUNDS {
            if control_stalled(&ops) {
                return Ok(Reply::Stall);
            }

            let status = ops.iter().any(|op| {
                matches!(op, TransportOp::Transmit { endpoint, data }
                    if *endpoint == EndpointAddress::EP0_IN && data.is_empty())
            });
            if status {
                self.deliver(TransportEvent::InComplete {
                    endpoint: EndpointAddress::EP0_IN,
                })
                .await?;
                return Ok(Reply::Data(Vec::new()));
            }

            let armed = ops.iter().find_map(|op| match op {
                TransportOp::PrepareReceive { endpoint, max_len }
                    if *endpoint == EndpointAddress::EP0_OUT =>
                {
                    Some(usize::from(*max_len))
                }
                _ => None,
            });
            let Some(max_len) = armed else {
                bail!("Device went silent during an OUT control transfer");
            };

            let end = data.len().min(offset + max_len);
            let packet = data[offset..end].to_vec();
            offset = end;
            ops = self
                .deliver(TransportEvent::OutComplete {
                    endpoint: EndpointAddress::EP0_OUT,
                    data: packet,
                })
                .await?;
        }

        bail!("Control transfer did not finish")
    }

    /// Queue an input report and acknowledge it on the bus
    ///
    /// Returns the bytes the host received.
    pub async fn interrupt_in(&mut self, interface: u8, report: Vec<u8>) -> Result<Vec<u8>> {
        let ops = self
            .bridge
            .send_report(interface, report)
            .await
            .with_context(|| format!("Report on interface {} refused", interface))?;

        let (endpoint, data) = ops
            .into_iter()
            .find_map(|op| match op {
                TransportOp::Transmit { endpoint, data } if !endpoint.is_control() => {
                    Some((endpoint, data))
                }
                _ => None,
            })
            .ok_or_else(|| anyhow!("Report on interface {} was not transmitted", interface))?;

        self.deliver(TransportEvent::InComplete { endpoint }).await?;
        Ok(data)
    }

    /// Deliver an output report on an interrupt OUT endpoint
    pub async fn interrupt_out(&mut self, endpoint: EndpointAddress, data: Vec<u8>) -> Result<Vec<TransportOp>> {
        self.deliver(TransportEvent::OutComplete { endpoint, data }).await
    }

    /// Run the full enumeration script against the device
    pub async fn enumerate(&mut self, speed: DeviceSpeed, address: u8) -> Result<EnumerationSummary> {
        let mut summary = EnumerationSummary {
            speed,
            ..Default::default()
        };

        self.reset(speed).await?;

        // First request at address 0, as hosts do before SET_ADDRESS
        let first = self
            .control_in(SetupRequest::get_descriptor(DescriptorType::Device, 0, 0, 64))
            .await?
            .expect_data("GET_DESCRIPTOR(Device) at address 0")?;
        summary.max_packet_size0 = *first
            .get(7)
            .ok_or_else(|| anyhow!("Device descriptor too short: {} bytes", first.len()))?;

        self.control_out(SetupRequest::set_address(u16::from(address)), &[])
            .await?
            .expect_data("SET_ADDRESS")?;
        info!("Device addressed at {}", address);

        let device = self
            .control_in(SetupRequest::get_descriptor(DescriptorType::Device, 0, 0, 18))
            .await?
            .expect_data("GET_DESCRIPTOR(Device)")?;
        if device.len() != 18 {
            bail!("Device descriptor is {} bytes, expected 18", device.len());
        }
        summary.usb_version = u16::from_le_bytes([device[2], device[3]]);
        summary.vendor_id = u16::from_le_bytes([device[8], device[9]]);
        summary.product_id = u16::from_le_bytes([device[10], device[11]]);

        let header = self
            .control_in(SetupRequest::get_descriptor(DescriptorType::Configuration, 0, 0, 9))
            .await?
            .expect_data("GET_DESCRIPTOR(Configuration) header")?;
        if header.len() < 9 {
            bail!("Configuration header is {} bytes", header.len());
        }
        let total = u16::from_le_bytes([header[2], header[3]]);

        let config = self
            .control_in(SetupRequest::get_descriptor(DescriptorType::Configuration, 0, 0, total))
            .await?
            .expect_data("GET_DESCRIPTOR(Configuration)")?;
        summary.configuration_len = config.len();
        summary.configuration_value = header[5];
        summary.interfaces = parse_interfaces(&config);

        summary.qualifier = !self
            .control_in(SetupRequest::get_descriptor(DescriptorType::DeviceQualifier, 0, 0, 10))
            .await?
            .is_stall();

        let langids = self
            .control_in(SetupRequest::get_descriptor(DescriptorType::String, 0, 0, 255))
            .await?
            .expect_data("GET_DESCRIPTOR(String 0)")?;
        let langid = match langids.get(2..4) {
            Some(&[lo, hi]) => u16::from_le_bytes([lo, hi]),
            _ => bail!("LANGID descriptor is {} bytes", langids.len()),
        };

        let mut indices = vec![device[14], device[15], device[16], header[6]];
        indices.extend(summary.interfaces.iter().map(|i| i.string_index));
        for index in indices.into_iter().filter(|i| *i != 0) {
            if summary.strings.iter().any(|(i, _)| *i == index) {
                continue;
            }
            let bytes = self
                .control_in(string_request(index, langid))
                .await?
                .expect_data(&format!("GET_DESCRIPTOR(String {})", index))?;
            let text = decode_string_descriptor(&bytes)
                .ok_or_else(|| anyhow!("String {} is not valid UTF-16", index))?;
            summary.strings.push((index, text));
        }

        summary.unknown_string_stalled = self
            .control_in(string_request(UNKNOWN_STRING_INDEX, langid))
            .await?
            .is_stall();

        self.control_out(
            SetupRequest::set_configuration(u16::from(summary.configuration_value)),
            &[],
        )
            .await?
            .expect_data("SET_CONFIGURATION")?;
        info!("Device configured");

        let status = self
            .control_in(SetupRequest::get_status(Recipient::Device, 0))
            .await?
            .expect_data("GET_STATUS(Device)")?;
        summary.self_powered = status.first().is_some_and(|s| s & 0x01 != 0);

        let mut interfaces = std::mem::take(&mut summary.interfaces);
        for interface in interfaces.iter_mut().filter(|i| i.is_hid()) {
            self.setup_hid_interface(interface, &mut summary).await?;
        }
        summary.interfaces = interfaces;

        // One pointer report on the first function's IN endpoint
        if let Some(first) = summary.interfaces.iter().find(|i| i.is_hid() && i.in_endpoint().is_some()) {
            let sent = self.interrupt_in(first.number, vec![0x01, 0x0A, 0xF6]).await?;
            debug!("Input report {:02x?} reached the host", sent);
            summary.reports_sent += 1;
        }

        summary.notices = self.bridge.drain_notices();
        summary.snapshot = self.bridge.snapshot().await?;
        Ok(summary)
    }

    async fn setup_hid_interface(
        &mut self,
        interface: &mut InterfaceSummary,
        summary: &mut EnumerationSummary,
    ) -> Result<()> {
        if self.control_out(SetupRequest::hid_set_idle(interface.number, 0), &[]).await?.is_stall() {
            warn!("SET_IDLE stalled on interface {}", interface.number);
        }

        if let Some(len) = interface.report_len {
            let report = self
                .control_in(SetupRequest::get_interface_descriptor(
                    DescriptorType::Report,
                    interface.number,
                    len,
                ))
                .await?
                .expect_data(&format!("GET_DESCRIPTOR(Report) on interface {}", interface.number))?;
            interface.report_descriptor = Some(report);
        }

        // Output traffic only makes sense for interfaces with an OUT endpoint
        let Some(out) = interface.out_endpoint() else {
            return Ok(());
        };
        let report_id = report_id(interface.report_descriptor.as_deref()).unwrap_or(0);
        let mut payload = vec![report_id];
        payload.extend(1..=8u8);

        let reply = self
            .control_out(
                SetupRequest::hid_set_report(
                    interface.number,
                    ReportType::Output,
                    report_id,
                    payload.len() as u16,
                ),
                &payload,
            )
            .await?;
        if reply.is_stall() {
            warn!("SET_REPORT stalled on interface {}", interface.number);
        } else {
            summary.set_reports += 1;
        }

        self.interrupt_out(out, payload).await?;
        Ok(())
    }

    async fn deliver(&self, event: TransportEvent) -> Result<Vec<TransportOp>> {
        self.bridge
            .deliver(event)
            .await
            .context("Device worker is not responding")
    }
}

fn control_stalled(ops: &[TransportOp]) -> bool {
    ops.iter()
        .any(|op| matches!(op, TransportOp::Stall { endpoint } if endpoint.is_control()))
}

fn string_request(index: u8, langid: u16) -> SetupRequest {
    SetupRequest::get_descriptor(DescriptorType::String, index, langid, 255)
}

/// Collect interfaces with their endpoints and HID report lengths
fn parse_interfaces(config: &[u8]) -> Vec<InterfaceSummary> {
    let mut interfaces: Vec<InterfaceSummary> = Vec::new();
    for (descriptor_type, bytes) in DescriptorIter::new(config) {
        match DescriptorType::from_u8(descriptor_type) {
            Some(DescriptorType::Interface) if bytes.len() >= 9 => {
                interfaces.push(InterfaceSummary {
                    number: bytes[2],
                    class: bytes[5],
                    subclass: bytes[6],
                    protocol: bytes[7],
                    string_index: bytes[8],
                    endpoints: Vec::new(),
                    report_len: None,
                    report_descriptor: None,
                });
            }
            Some(DescriptorType::Endpoint) if bytes.len() >= 7 => {
                if let Some(current) = interfaces.last_mut() {
                    current.endpoints.push(EndpointAddress(bytes[2]));
                }
            }
            Some(DescriptorType::Hid) if bytes.len() >= 9 => {
                if let Some(current) = interfaces.last_mut() {
                    current.report_len = Some(u16::from_le_bytes([bytes[7], bytes[8]]));
                }
            }
            _ => {}
        }
    }
    interfaces
}

/// First Report ID item (0x85) in a report descriptor
fn report_id(report: Option<&[u8]>) -> Option<u8> {
    report?
        .windows(2)
        .find(|item| item[0] == 0x85)
        .map(|item| item[1])
}
