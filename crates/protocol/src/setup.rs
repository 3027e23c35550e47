//! Setup packet decoding
//!
//! A control transfer starts with an 8-byte SETUP packet. Its layout is fixed
//! by USB 2.0 chapter 9 (all multi-byte fields little-endian):
//!
//! ```text
//! [bmRequestType][bRequest][wValue lo, hi][wIndex lo, hi][wLength lo, hi]
//! ```
//!
//! The packet is decoded exactly once into a [`SetupRequest`]; nothing
//! downstream looks at the raw bytes again. The host side builds requests
//! with the typed constructors and encodes them with
//! [`SetupRequest::to_bytes`].

use crate::error::{ProtocolError, Result};
use crate::hid::{HidRequest, ReportType};
use crate::requests::{DescriptorType, StandardRequest};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Size of a setup packet in bytes
pub const SETUP_PACKET_SIZE: usize = 8;

/// Data stage direction, bit 7 of bmRequestType
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Host to device (OUT)
    HostToDevice,
    /// Device to host (IN)
    DeviceToHost,
}

/// Request kind, bits 6..5 of bmRequestType
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
}

/// Request recipient, bits 4..0 of bmRequestType
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
}

/// Decoded bmRequestType
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestType {
    pub direction: Direction,
    pub kind: RequestKind,
    pub recipient: Recipient,
}

impl RequestType {
    /// Decode a bmRequestType byte
    pub fn from_u8(raw: u8) -> Result<Self> {
        let direction = if raw & 0x80 != 0 {
            Direction::DeviceToHost
        } else {
            Direction::HostToDevice
        };

        let kind = match (raw >> 5) & 0x03 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => return Err(ProtocolError::ReservedRequestType(raw)),
        };

        let recipient = match raw & 0x1F {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            _ => return Err(ProtocolError::UnsupportedRecipient(raw)),
        };

        Ok(Self {
            direction,
            kind,
            recipient,
        })
    }

    /// Encode back into a bmRequestType byte
    pub fn to_u8(self) -> u8 {
        let direction = match self.direction {
            Direction::HostToDevice => 0x00,
            Direction::DeviceToHost => 0x80,
        };
        let kind = match self.kind {
            RequestKind::Standard => 0x00,
            RequestKind::Class => 0x20,
            RequestKind::Vendor => 0x40,
        };
        let recipient = match self.recipient {
            Recipient::Device => 0x00,
            Recipient::Interface => 0x01,
            Recipient::Endpoint => 0x02,
        };
        direction | kind | recipient
    }
}

/// One decoded control request
///
/// Immutable once parsed. Accessors interpret `value`/`index` the way the
/// standard requests lay them out, so handlers never split the fields by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetupRequest {
    pub request_type: RequestType,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupRequest {
    /// Decode an 8-byte setup packet
    ///
    /// # Example
    /// ```
    /// use protocol::{Direction, Recipient, RequestKind, SetupRequest};
    ///
    /// // GET_DESCRIPTOR(Device), wLength = 18
    /// let req = SetupRequest::parse(&[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]).unwrap();
    /// assert_eq!(req.request_type.direction, Direction::DeviceToHost);
    /// assert_eq!(req.request_type.kind, RequestKind::Standard);
    /// assert_eq!(req.request_type.recipient, Recipient::Device);
    /// assert_eq!(req.descriptor_type(), 0x01);
    /// assert_eq!(req.length, 18);
    /// ```
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SETUP_PACKET_SIZE {
            return Err(ProtocolError::ShortSetupPacket(bytes.len()));
        }

        let mut reader = Cursor::new(bytes);
        let request_type = RequestType::from_u8(reader.read_u8()?)?;
        let request = reader.read_u8()?;
        let value = reader.read_u16::<LittleEndian>()?;
        let index = reader.read_u16::<LittleEndian>()?;
        let length = reader.read_u16::<LittleEndian>()?;

        Ok(Self {
            request_type,
            request,
            value,
            index,
            length,
        })
    }

    /// Encode into the 8-byte wire layout
    pub fn to_bytes(&self) -> [u8; SETUP_PACKET_SIZE] {
        let mut out = [0u8; SETUP_PACKET_SIZE];
        let mut writer = Cursor::new(&mut out[..]);
        // Writes into a fixed 8-byte buffer cannot fail.
        let _ = writer.write_u8(self.request_type.to_u8());
        let _ = writer.write_u8(self.request);
        let _ = writer.write_u16::<LittleEndian>(self.value);
        let _ = writer.write_u16::<LittleEndian>(self.index);
        let _ = writer.write_u16::<LittleEndian>(self.length);
        out
    }

    pub fn direction(&self) -> Direction {
        self.request_type.direction
    }

    pub fn kind(&self) -> RequestKind {
        self.request_type.kind
    }

    pub fn recipient(&self) -> Recipient {
        self.request_type.recipient
    }

    /// Descriptor type for GET_DESCRIPTOR (high byte of wValue)
    pub fn descriptor_type(&self) -> u8 {
        (self.value >> 8) as u8
    }

    /// Descriptor index for GET_DESCRIPTOR (low byte of wValue)
    pub fn descriptor_index(&self) -> u8 {
        (self.value & 0xFF) as u8
    }

    /// Interface number addressed by the request (low byte of wIndex)
    pub fn interface(&self) -> u8 {
        (self.index & 0xFF) as u8
    }

    /// Endpoint address addressed by the request (low byte of wIndex)
    pub fn endpoint(&self) -> u8 {
        (self.index & 0xFF) as u8
    }

    /// Whether the request has a data stage
    pub fn has_data_stage(&self) -> bool {
        self.length != 0
    }
}

/// Requests a host issues while enumerating a device
impl SetupRequest {
    pub fn new(request_type: RequestType, request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type,
            request,
            value,
            index,
            length,
        }
    }

    fn standard(
        direction: Direction,
        recipient: Recipient,
        request: StandardRequest,
        value: u16,
        index: u16,
        length: u16,
    ) -> Self {
        let request_type = RequestType {
            direction,
            kind: RequestKind::Standard,
            recipient,
        };
        Self::new(request_type, request as u8, value, index, length)
    }

    fn hid(direction: Direction, request: HidRequest, value: u16, interface: u8, length: u16) -> Self {
        let request_type = RequestType {
            direction,
            kind: RequestKind::Class,
            recipient: Recipient::Interface,
        };
        Self::new(request_type, request as u8, value, u16::from(interface), length)
    }

    /// GET_DESCRIPTOR addressed to the device
    ///
    /// `language` is the LANGID for string descriptors and 0 otherwise.
    ///
    /// # Example
    /// ```
    /// use protocol::{DescriptorType, SetupRequest};
    ///
    /// let req = SetupRequest::get_descriptor(DescriptorType::Device, 0, 0, 18);
    /// assert_eq!(req.to_bytes(), [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);
    /// ```
    pub fn get_descriptor(descriptor_type: DescriptorType, index: u8, language: u16, length: u16) -> Self {
        Self::standard(
            Direction::DeviceToHost,
            Recipient::Device,
            StandardRequest::GetDescriptor,
            u16::from(descriptor_type as u8) << 8 | u16::from(index),
            language,
            length,
        )
    }

    /// GET_DESCRIPTOR addressed to an interface (HID and report descriptors)
    pub fn get_interface_descriptor(descriptor_type: DescriptorType, interface: u8, length: u16) -> Self {
        Self::standard(
            Direction::DeviceToHost,
            Recipient::Interface,
            StandardRequest::GetDescriptor,
            u16::from(descriptor_type as u8) << 8,
            u16::from(interface),
            length,
        )
    }

    pub fn set_address(address: u16) -> Self {
        Self::standard(
            Direction::HostToDevice,
            Recipient::Device,
            StandardRequest::SetAddress,
            address,
            0,
            0,
        )
    }

    pub fn set_configuration(value: u16) -> Self {
        Self::standard(
            Direction::HostToDevice,
            Recipient::Device,
            StandardRequest::SetConfiguration,
            value,
            0,
            0,
        )
    }

    /// GET_STATUS; `index` is the interface number or endpoint address
    pub fn get_status(recipient: Recipient, index: u16) -> Self {
        Self::standard(
            Direction::DeviceToHost,
            recipient,
            StandardRequest::GetStatus,
            0,
            index,
            2,
        )
    }

    /// HID SET_IDLE for all reports on `interface`, duration in 4 ms units
    pub fn hid_set_idle(interface: u8, duration: u8) -> Self {
        Self::hid(
            Direction::HostToDevice,
            HidRequest::SetIdle,
            u16::from(duration) << 8,
            interface,
            0,
        )
    }

    /// HID SET_REPORT with a `length` byte data stage
    pub fn hid_set_report(interface: u8, report_type: ReportType, report_id: u8, length: u16) -> Self {
        Self::hid(
            Direction::HostToDevice,
            HidRequest::SetReport,
            u16::from(report_type.to_u8()) << 8 | u16::from(report_id),
            interface,
            length,
        )
    }
}
