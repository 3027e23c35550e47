//! Built-in HID report descriptors
//!
//! Functions in the configuration name one of these with `report_preset`, or
//! spell out their own bytes with `report_hex`.

use anyhow::{Result, anyhow};

/// Three-button boot mouse with relative X/Y
pub const MOUSE_REPORT: [u8; 50] = [
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    0x05, 0x09, //     Usage Page (Button)
    0x19, 0x01, //     Usage Minimum (1)
    0x29, 0x03, //     Usage Maximum (3)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x03, //     Report Count (3)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Var, Abs)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x05, //     Report Size (5)
    0x81, 0x03, //     Input (Const, Var, Abs)
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x02, //     Report Count (2)
    0x81, 0x06, //     Input (Data, Var, Rel)
    0xC0, //   End Collection
    0xC0, // End Collection
];

/// Vendor-defined channel: report ID 2, eight bytes each way
pub const VENDOR_REPORT: [u8; 29] = [
    0x06, 0x00, 0xFF, // Usage Page (Vendor Defined 0xFF00)
    0x09, 0x01, // Usage (1)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x02, //   Report ID (2)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x08, //   Report Count (8)
    0x09, 0x01, //   Usage (1)
    0x81, 0x00, //   Input (Data, Array, Abs)
    0x95, 0x08, //   Report Count (8)
    0x09, 0x01, //   Usage (1)
    0x91, 0x00, //   Output (Data, Array, Abs)
    0xC0, // End Collection
];

pub const PRESET_NAMES: [&str; 2] = ["mouse", "vendor"];

/// Look up a preset by name
pub fn lookup(name: &str) -> Option<&'static [u8]> {
    match name {
        "mouse" => Some(&MOUSE_REPORT),
        "vendor" => Some(&VENDOR_REPORT),
        _ => None,
    }
}

/// Parse report descriptor bytes written as hex
///
/// Whitespace, commas and `0x` prefixes are ignored, so both
/// `"05 01 09 02"` and `"0x05, 0x01"` are accepted.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for token in text.split(|c: char| c.is_whitespace() || c == ',') {
        if token.is_empty() {
            continue;
        }
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);

        if digits.is_empty() || digits.len() % 2 != 0 {
            return Err(anyhow!("Invalid hex token '{}'", token));
        }
        for pair in digits.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(pair).map_err(|_| anyhow!("Invalid hex token '{}'", token))?;
            let byte = u8::from_str_radix(pair, 16)
                .map_err(|_| anyhow!("Invalid hex token '{}'", token))?;
            bytes.push(byte);
        }
    }

    if bytes.is_empty() {
        return Err(anyhow!("Report descriptor is empty"));
    }
    Ok(bytes)
}
