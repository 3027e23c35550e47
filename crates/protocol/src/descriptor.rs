//! Standard descriptor builders
//!
//! Byte-exact builders for the descriptors of USB 2.0 section 9.6, plus a
//! small iterator for walking a configuration blob. All multi-byte fields are
//! written little-endian.

use crate::error::{ProtocolError, Result};
use crate::requests::DescriptorType;
use crate::types::{DeviceSpeed, EndpointConfig};
use byteorder::{LittleEndian, WriteBytesExt};

pub const DEVICE_DESCRIPTOR_LEN: usize = 18;
pub const QUALIFIER_DESCRIPTOR_LEN: usize = 10;
pub const CONFIG_DESCRIPTOR_LEN: usize = 9;
pub const INTERFACE_DESCRIPTOR_LEN: usize = 9;
pub const ENDPOINT_DESCRIPTOR_LEN: usize = 7;

/// A string descriptor holds at most 126 UTF-16 code units (bLength is a u8)
pub const MAX_STRING_UNITS: usize = 126;

/// English (United States)
pub const LANGID_EN_US: u16 = 0x0409;

/// bmAttributes bit 7, always set for USB 2.0
pub const CONFIG_ATTR_RESERVED: u8 = 0x80;
pub const CONFIG_ATTR_SELF_POWERED: u8 = 0x40;
pub const CONFIG_ATTR_REMOTE_WAKEUP: u8 = 0x20;

/// Device descriptor fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub usb_version: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DEVICE_DESCRIPTOR_LEN);
        out.push(DEVICE_DESCRIPTOR_LEN as u8);
        out.push(DescriptorType::Device as u8);
        push_u16(&mut out, self.usb_version);
        out.push(self.device_class);
        out.push(self.device_subclass);
        out.push(self.device_protocol);
        out.push(self.max_packet_size0);
        push_u16(&mut out, self.vendor_id);
        push_u16(&mut out, self.product_id);
        push_u16(&mut out, self.device_version);
        out.push(self.manufacturer_index);
        out.push(self.product_index);
        out.push(self.serial_number_index);
        out.push(self.num_configurations);
        out
    }

    /// Device qualifier describing this device at its other speed
    pub fn qualifier_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(QUALIFIER_DESCRIPTOR_LEN);
        out.push(QUALIFIER_DESCRIPTOR_LEN as u8);
        out.push(DescriptorType::DeviceQualifier as u8);
        push_u16(&mut out, self.usb_version);
        out.push(self.device_class);
        out.push(self.device_subclass);
        out.push(self.device_protocol);
        out.push(self.max_packet_size0);
        out.push(self.num_configurations);
        out.push(0x00); // bReserved
        out
    }
}

/// Configuration descriptor header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigHeader {
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration_index: u8,
    pub attributes: u8,
    /// bMaxPower in 2 mA units
    pub max_power: u8,
}

impl ConfigHeader {
    /// Prepend the header to the interface/endpoint body, filling in wTotalLength
    pub fn assemble(&self, body: &[u8]) -> Result<Vec<u8>> {
        let total = CONFIG_DESCRIPTOR_LEN + body.len();
        let total_len = u16::try_from(total).map_err(|_| ProtocolError::DescriptorTooLarge {
            size: total,
            max: u16::MAX as usize,
        })?;

        let mut out = Vec::with_capacity(total);
        out.push(CONFIG_DESCRIPTOR_LEN as u8);
        out.push(DescriptorType::Configuration as u8);
        push_u16(&mut out, total_len);
        out.push(self.num_interfaces);
        out.push(self.configuration_value);
        out.push(self.configuration_index);
        out.push(self.attributes | CONFIG_ATTR_RESERVED);
        out.push(self.max_power);
        out.extend_from_slice(body);
        Ok(out)
    }
}

/// Interface descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub string_index: u8,
}

impl InterfaceDescriptor {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[
            INTERFACE_DESCRIPTOR_LEN as u8,
            DescriptorType::Interface as u8,
            self.number,
            self.alternate_setting,
            self.num_endpoints,
            self.class,
            self.subclass,
            self.protocol,
            self.string_index,
        ]);
    }
}

/// Append an endpoint descriptor using the polling interval for `speed`
pub fn write_endpoint(out: &mut Vec<u8>, endpoint: &EndpointConfig, speed: DeviceSpeed) {
    out.push(ENDPOINT_DESCRIPTOR_LEN as u8);
    out.push(DescriptorType::Endpoint as u8);
    out.push(endpoint.address.0);
    out.push(endpoint.transfer_type.attributes());
    push_u16(out, endpoint.max_packet_size);
    out.push(endpoint.interval(speed));
}

/// String descriptor zero: the supported language IDs
pub fn langid_descriptor(langids: &[u16]) -> Result<Vec<u8>> {
    let len = 2 + langids.len() * 2;
    if len > u8::MAX as usize {
        return Err(ProtocolError::DescriptorTooLarge {
            size: len,
            max: u8::MAX as usize,
        });
    }

    let mut out = Vec::with_capacity(len);
    out.push(len as u8);
    out.push(DescriptorType::String as u8);
    for &langid in langids {
        push_u16(&mut out, langid);
    }
    Ok(out)
}

/// Encode `text` as a UTF-16LE string descriptor
///
/// # Example
/// ```
/// use protocol::descriptor::encode_string_descriptor;
///
/// let desc = encode_string_descriptor("Hi").unwrap();
/// assert_eq!(desc, vec![6, 0x03, b'H', 0, b'i', 0]);
/// ```
pub fn encode_string_descriptor(text: &str) -> Result<Vec<u8>> {
    let units: Vec<u16> = text.encode_utf16().collect();
    if units.len() > MAX_STRING_UNITS {
        return Err(ProtocolError::StringTooLong {
            len: units.len(),
            max: MAX_STRING_UNITS,
        });
    }

    let mut out = Vec::with_capacity(2 + units.len() * 2);
    out.push((2 + units.len() * 2) as u8);
    out.push(DescriptorType::String as u8);
    for unit in units {
        push_u16(&mut out, unit);
    }
    Ok(out)
}

/// Decode a string descriptor back into text
pub fn decode_string_descriptor(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 2 || bytes[1] != DescriptorType::String as u8 {
        return None;
    }
    let len = (bytes[0] as usize).min(bytes.len());
    let units: Vec<u16> = bytes[2..len]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

/// Walks the descriptors packed in a configuration blob
///
/// Yields `(bDescriptorType, descriptor bytes)` pairs and stops at the first
/// malformed length.
pub struct DescriptorIter<'a> {
    remaining: &'a [u8],
}

impl<'a> DescriptorIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { remaining: bytes }
    }
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.remaining.first()? as usize;
        if len < 2 || len > self.remaining.len() {
            return None;
        }
        let (desc, rest) = self.remaining.split_at(len);
        self.remaining = rest;
        Some((desc[1], desc))
    }
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    // Writing into a Vec cannot fail.
    let _ = out.write_u16::<LittleEndian>(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EndpointAddress;

    fn identity() -> DeviceDescriptor {
        DeviceDescriptor {
            usb_version: 0x0200,
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            max_packet_size0: 64,
            vendor_id: 0x1234,
            product_id: 0x5678,
            device_version: 0x0200,
            manufacturer_index: 1,
            product_index: 2,
            serial_number_index: 3,
            num_configurations: 1,
        }
    }

    #[test]
    fn test_device_descriptor_layout() {
        let bytes = identity().to_bytes();
        assert_eq!(
            bytes,
            vec![
                0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40, 0x34, 0x12, 0x78, 0x56, 0x00,
                0x02, 0x01, 0x02, 0x03, 0x01
            ]
        );
    }

    #[test]
    fn test_qualifier_layout() {
        let bytes = identity().qualifier_bytes();
        assert_eq!(
            bytes,
            vec![0x0A, 0x06, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40, 0x01, 0x00]
        );
    }

    #[test]
    fn test_config_total_length() {
        let mut body = Vec::new();
        InterfaceDescriptor {
            number: 0,
            alternate_setting: 0,
            num_endpoints: 1,
            class: 3,
            subclass: 1,
            protocol: 2,
            string_index: 4,
        }
        .write_to(&mut body);
        let ep = EndpointConfig::interrupt(EndpointAddress(0x81), 4, 10, 7);
        write_endpoint(&mut body, &ep, DeviceSpeed::Full);

        let header = ConfigHeader {
            num_interfaces: 1,
            configuration_value: 1,
            configuration_index: 0,
            attributes: CONFIG_ATTR_SELF_POWERED,
            max_power: 0x32,
        };
        let blob = header.assemble(&body).unwrap();

        assert_eq!(blob.len(), 9 + 9 + 7);
        assert_eq!(u16::from_le_bytes([blob[2], blob[3]]), 25);
        assert_eq!(blob[7], 0xC0);
        assert_eq!(&blob[18..], &[0x07, 0x05, 0x81, 0x03, 0x04, 0x00, 10]);
    }

    #[test]
    fn test_endpoint_interval_follows_speed() {
        let ep = EndpointConfig::interrupt(EndpointAddress(0x02), 9, 10, 7);
        let mut hs = Vec::new();
        write_endpoint(&mut hs, &ep, DeviceSpeed::High);
        assert_eq!(hs[6], 7);
    }

    #[test]
    fn test_string_descriptor_utf16() {
        let desc = encode_string_descriptor("Composite HID Device").unwrap();
        assert_eq!(desc[0] as usize, desc.len());
        assert_eq!(desc[0], 2 + 20 * 2);
        assert_eq!(
            decode_string_descriptor(&desc).as_deref(),
            Some("Composite HID Device")
        );
    }

    #[test]
    fn test_string_descriptor_empty_and_limit() {
        assert_eq!(encode_string_descriptor("").unwrap(), vec![2, 3]);
        assert!(encode_string_descriptor(&"x".repeat(126)).is_ok());
        assert!(matches!(
            encode_string_descriptor(&"x".repeat(127)),
            Err(ProtocolError::StringTooLong { len: 127, max: 126 })
        ));
    }

    #[test]
    fn test_langid_descriptor() {
        assert_eq!(
            langid_descriptor(&[LANGID_EN_US]).unwrap(),
            vec![4, 3, 0x09, 0x04]
        );
    }

    #[test]
    fn test_descriptor_iter() {
        let blob = [9, 2, 0, 0, 0, 0, 0, 0, 0, 3, 0x21, 0, 2, 5];
        let types: Vec<u8> = DescriptorIter::new(&blob).map(|(t, _)| t).collect();
        assert_eq!(types, vec![2, 0x21, 5]);

        // Truncated trailing descriptor stops the walk
        let truncated = [9, 2, 0, 0, 0, 0, 0, 0, 0, 7, 5, 0x81];
        assert_eq!(DescriptorIter::new(&truncated).count(), 1);
    }
}
