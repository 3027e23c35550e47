//! HID class constants and descriptor builder (HID 1.11 section 7)

use crate::error::{ProtocolError, Result};
use crate::requests::DescriptorType;

/// Interface class code for HID
pub const HID_CLASS: u8 = 0x03;

/// bcdHID reported by every function (HID 1.11)
pub const HID_BCD: u16 = 0x0111;

/// Length of the HID class descriptor with one subordinate descriptor
pub const HID_DESCRIPTOR_LEN: usize = 9;

/// bInterfaceSubClass values
pub mod subclass {
    pub const NONE: u8 = 0x00;
    pub const BOOT: u8 = 0x01;
}

/// bInterfaceProtocol values
pub mod protocol {
    pub const NONE: u8 = 0x00;
    pub const KEYBOARD: u8 = 0x01;
    pub const MOUSE: u8 = 0x02;
}

/// HID class request codes (bRequest for kind = Class)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HidRequest {
    GetReport = 0x01,
    GetIdle = 0x02,
    GetProtocol = 0x03,
    SetReport = 0x09,
    SetIdle = 0x0A,
    SetProtocol = 0x0B,
}

impl HidRequest {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::GetReport),
            0x02 => Some(Self::GetIdle),
            0x03 => Some(Self::GetProtocol),
            0x09 => Some(Self::SetReport),
            0x0A => Some(Self::SetIdle),
            0x0B => Some(Self::SetProtocol),
            _ => None,
        }
    }
}

/// Report type carried in the high byte of wValue for GET/SET_REPORT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportType {
    Input,
    Output,
    Feature,
}

impl ReportType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Input),
            0x02 => Some(Self::Output),
            0x03 => Some(Self::Feature),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Input => 0x01,
            Self::Output => 0x02,
            Self::Feature => 0x03,
        }
    }
}

/// Build the 9-byte HID class descriptor announcing one report descriptor
/// of `report_len` bytes.
pub fn hid_descriptor(report_len: usize) -> Result<[u8; HID_DESCRIPTOR_LEN]> {
    let report_len = u16::try_from(report_len).map_err(|_| ProtocolError::DescriptorTooLarge {
        size: report_len,
        max: u16::MAX as usize,
    })?;
    let [bcd_lo, bcd_hi] = HID_BCD.to_le_bytes();
    let [len_lo, len_hi] = report_len.to_le_bytes();

    Ok([
        HID_DESCRIPTOR_LEN as u8,
        DescriptorType::Hid as u8,
        bcd_lo,
        bcd_hi,
        0x00, // bCountryCode
        0x01, // bNumDescriptors
        DescriptorType::Report as u8,
        len_lo,
        len_hi,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hid_descriptor_layout() {
        let desc = hid_descriptor(50).unwrap();
        assert_eq!(desc, [0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 50, 0]);
    }

    #[test]
    fn test_hid_descriptor_large_report() {
        let desc = hid_descriptor(0x0123).unwrap();
        assert_eq!(desc[7], 0x23);
        assert_eq!(desc[8], 0x01);
        assert!(hid_descriptor(70_000).is_err());
    }

    #[test]
    fn test_request_codes() {
        assert_eq!(HidRequest::from_u8(0x09), Some(HidRequest::SetReport));
        assert_eq!(HidRequest::from_u8(0x0A), Some(HidRequest::SetIdle));
        assert_eq!(HidRequest::from_u8(0x04), None);
        assert_eq!(ReportType::from_u8(2), Some(ReportType::Output));
        assert_eq!(ReportType::from_u8(0), None);
    }
}
