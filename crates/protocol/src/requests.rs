//! Standard request, descriptor type and feature selector codes
//! (USB 2.0 tables 9-4, 9-5 and 9-6)

use serde::{Deserialize, Serialize};

/// Standard request codes (bRequest for kind = Standard)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StandardRequest {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
    GetInterface = 0x0A,
    SetInterface = 0x0B,
    SynchFrame = 0x0C,
}

impl StandardRequest {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::GetStatus),
            0x01 => Some(Self::ClearFeature),
            0x03 => Some(Self::SetFeature),
            0x05 => Some(Self::SetAddress),
            0x06 => Some(Self::GetDescriptor),
            0x07 => Some(Self::SetDescriptor),
            0x08 => Some(Self::GetConfiguration),
            0x09 => Some(Self::SetConfiguration),
            0x0A => Some(Self::GetInterface),
            0x0B => Some(Self::SetInterface),
            0x0C => Some(Self::SynchFrame),
            _ => None,
        }
    }
}

/// Descriptor type codes (high byte of wValue in GET_DESCRIPTOR)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DescriptorType {
    Device = 0x01,
    Configuration = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
    DeviceQualifier = 0x06,
    OtherSpeedConfiguration = 0x07,
    InterfacePower = 0x08,
    Bos = 0x0F,
    DeviceCapability = 0x10,
    /// HID class descriptor
    Hid = 0x21,
    /// HID report descriptor
    Report = 0x22,
}

impl DescriptorType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Device),
            0x02 => Some(Self::Configuration),
            0x03 => Some(Self::String),
            0x04 => Some(Self::Interface),
            0x05 => Some(Self::Endpoint),
            0x06 => Some(Self::DeviceQualifier),
            0x07 => Some(Self::OtherSpeedConfiguration),
            0x08 => Some(Self::InterfacePower),
            0x0F => Some(Self::Bos),
            0x10 => Some(Self::DeviceCapability),
            0x21 => Some(Self::Hid),
            0x22 => Some(Self::Report),
            _ => None,
        }
    }
}

/// Feature selectors for SET_FEATURE / CLEAR_FEATURE
pub mod feature {
    /// Endpoint recipient
    pub const ENDPOINT_HALT: u16 = 0;
    /// Device recipient
    pub const DEVICE_REMOTE_WAKEUP: u16 = 1;
    /// Device recipient (high-speed test modes)
    pub const TEST_MODE: u16 = 2;
}

/// String descriptor indices reserved for device-level strings
pub mod string_index {
    pub const LANGID: u8 = 0;
    pub const MANUFACTURER: u8 = 1;
    pub const PRODUCT: u8 = 2;
    pub const SERIAL_NUMBER: u8 = 3;

    /// First index available for configuration and interface strings
    pub const FIRST_USER: u8 = 4;

    /// Whether the index is served directly from the device catalog
    pub fn is_device_string(index: u8) -> bool {
        index <= SERIAL_NUMBER
    }
}

/// GET_STATUS(Device) bit 0
pub const STATUS_SELF_POWERED: u8 = 0x01;
/// GET_STATUS(Device) bit 1
pub const STATUS_REMOTE_WAKEUP: u8 = 0x02;
/// GET_STATUS(Endpoint) bit 0
pub const STATUS_HALTED: u8 = 0x01;

/// Highest assignable bus address
pub const MAX_DEVICE_ADDRESS: u16 = 127;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_request_codes() {
        assert_eq!(StandardRequest::from_u8(0x06), Some(StandardRequest::GetDescriptor));
        assert_eq!(StandardRequest::from_u8(0x09), Some(StandardRequest::SetConfiguration));
        assert_eq!(StandardRequest::from_u8(0x02), None);
        assert_eq!(StandardRequest::from_u8(0x04), None);
        assert_eq!(StandardRequest::SetAddress as u8, 0x05);
    }

    #[test]
    fn test_descriptor_type_codes() {
        assert_eq!(
            DescriptorType::from_u8(0x07),
            Some(DescriptorType::OtherSpeedConfiguration)
        );
        assert_eq!(DescriptorType::from_u8(0x22), Some(DescriptorType::Report));
        assert_eq!(DescriptorType::from_u8(0x99), None);
        assert_eq!(DescriptorType::Configuration as u8, 0x02);
    }

    #[test]
    fn test_device_string_indices() {
        assert!(string_index::is_device_string(0));
        assert!(string_index::is_device_string(3));
        assert!(!string_index::is_device_string(4));
    }
}
