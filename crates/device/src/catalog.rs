//! Descriptor catalog
//!
//! The catalog decides what bytes a descriptor contains; the dispatcher only
//! decides which descriptor to ask for. [`StaticCatalog`] assembles every
//! blob once from a [`DeviceIdentity`] and the registered functions.

use crate::error::CompositeError;
use crate::router::CompositeRouter;
use protocol::descriptor::{
    CONFIG_ATTR_REMOTE_WAKEUP, CONFIG_ATTR_SELF_POWERED, ConfigHeader, DeviceDescriptor,
    LANGID_EN_US, encode_string_descriptor, langid_descriptor,
};
use protocol::{DescriptorType, DeviceSpeed, string_index};
use std::collections::BTreeMap;

/// Offset of bMaxPacketSize0 in the device descriptor
const MAX_PACKET_SIZE0_OFFSET: usize = 7;

/// Offset of bmAttributes in the configuration descriptor
const CONFIG_ATTRIBUTES_OFFSET: usize = 7;

pub trait DescriptorCatalog: Send {
    fn device_descriptor(&self, speed: DeviceSpeed) -> &[u8];

    /// Configuration descriptor for `speed`, `None` if the device cannot run there
    fn config_descriptor(&self, speed: DeviceSpeed) -> Option<&[u8]>;

    /// LANGID table and manufacturer/product/serial strings
    fn string_descriptor(&self, index: u8) -> Option<&[u8]>;

    /// Present only on high-speed capable devices
    fn qualifier_descriptor(&self) -> Option<&[u8]>;

    fn bos_descriptor(&self) -> Option<&[u8]>;

    /// Device-level strings beyond the standard three (e.g. iConfiguration)
    fn user_string_descriptor(&self, index: u8) -> Option<&[u8]>;

    fn num_configurations(&self) -> u8;

    fn ep0_max_packet_size(&self) -> u8 {
        self.device_descriptor(DeviceSpeed::Full)
            .get(MAX_PACKET_SIZE0_OFFSET)
            .copied()
            .unwrap_or(8)
    }

    /// bmAttributes bit 6 of the configuration descriptor
    fn self_powered(&self) -> bool {
        self.config_descriptor(DeviceSpeed::Full)
            .and_then(|c| c.get(CONFIG_ATTRIBUTES_OFFSET))
            .is_some_and(|attrs| attrs & CONFIG_ATTR_SELF_POWERED != 0)
    }
}

/// Everything about the device that is not owned by a function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub usb_version: u16,
    pub max_packet_size0: u8,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
    /// iConfiguration and its text, served through the user-string hook
    pub configuration_string: Option<(u8, String)>,
    pub self_powered: bool,
    pub remote_wakeup: bool,
    pub max_power_ma: u16,
    pub high_speed: bool,
    pub bos: bool,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            vendor_id: 0x1234,
            product_id: 0x5678,
            device_version: 0x0200,
            usb_version: 0x0200,
            max_packet_size0: 64,
            manufacturer: "Your Manufacturer".into(),
            product: "Composite HID Device".into(),
            serial_number: "00000000001A".into(),
            configuration_string: None,
            self_powered: true,
            remote_wakeup: false,
            max_power_ma: 100,
            high_speed: false,
            bos: false,
        }
    }
}

/// Value of the only configuration this device exposes
pub const CONFIGURATION_VALUE: u8 = 1;

/// Descriptors serialized once at startup and served as-is
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    device: Vec<u8>,
    /// Full configuration tree at full speed
    config_fs: Vec<u8>,
    /// Same tree with high-speed intervals, for high-speed capable devices
    config_hs: Option<Vec<u8>>,
    qualifier: Option<Vec<u8>>,
    bos: Option<Vec<u8>>,
    strings: BTreeMap<u8, Vec<u8>>,
    user_strings: BTreeMap<u8, Vec<u8>>,
}

impl StaticCatalog {
    /// Assemble all descriptors for `identity` and the functions in `router`
    ///
    /// Interface numbers must run contiguously from 0 across the functions.
    pub fn build(identity: &DeviceIdentity, router: &CompositeRouter) -> Result<Self, CompositeError> {
        let num_interfaces = router.num_interfaces();
        let mut numbers: Vec<u8> = router
            .functions()
            .flat_map(|f| f.interfaces().iter().copied())
            .collect();
        numbers.sort_unstable();
        for (expected, &number) in numbers.iter().enumerate() {
            if number as usize != expected {
                return Err(CompositeError::InterfaceGap(expected as u8));
            }
        }

        let device = DeviceDescriptor {
            usb_version: identity.usb_version,
            device_class: 0x00,
            device_subclass: 0x00,
            device_protocol: 0x00,
            max_packet_size0: identity.max_packet_size0,
            vendor_id: identity.vendor_id,
            product_id: identity.product_id,
            device_version: identity.device_version,
            manufacturer_index: string_index::MANUFACTURER,
            product_index: string_index::PRODUCT,
            serial_number_index: string_index::SERIAL_NUMBER,
            num_configurations: 1,
        };

        let mut attributes = 0;
        if identity.self_powered {
            attributes |= CONFIG_ATTR_SELF_POWERED;
        }
        if identity.remote_wakeup {
            attributes |= CONFIG_ATTR_REMOTE_WAKEUP;
        }
        let header = ConfigHeader {
            num_interfaces: num_interfaces as u8,
            configuration_value: CONFIGURATION_VALUE,
            configuration_index: identity
                .configuration_string
                .as_ref()
                .map_or(0, |(index, _)| *index),
            attributes,
            max_power: (identity.max_power_ma / 2).min(u8::MAX as u16) as u8,
        };

        let config_for = |speed: DeviceSpeed| -> Result<Vec<u8>, CompositeError> {
            let mut body = Vec::new();
            for function in router.functions() {
                body.extend(function.configuration_fragment(speed)?);
            }
            Ok(header.assemble(&body)?)
        };

        let config_fs = config_for(DeviceSpeed::Full)?;
        let config_hs = if identity.high_speed {
            Some(config_for(DeviceSpeed::High)?)
        } else {
            None
        };
        let qualifier = identity.high_speed.then(|| device.qualifier_bytes());

        let mut strings = BTreeMap::new();
        strings.insert(string_index::LANGID, langid_descriptor(&[LANGID_EN_US])?);
        strings.insert(
            string_index::MANUFACTURER,
            encode_string_descriptor(&identity.manufacturer)?,
        );
        strings.insert(
            string_index::PRODUCT,
            encode_string_descriptor(&identity.product)?,
        );
        strings.insert(
            string_index::SERIAL_NUMBER,
            encode_string_descriptor(&identity.serial_number)?,
        );

        let mut user_strings = BTreeMap::new();
        if let Some((index, text)) = &identity.configuration_string {
            user_strings.insert(*index, encode_string_descriptor(text)?);
        }

        Ok(Self {
            device: device.to_bytes(),
            config_fs,
            config_hs,
            qualifier,
            bos: identity.bos.then(usb2_extension_bos),
            strings,
            user_strings,
        })
    }
}

/// BOS with a single USB 2.0 extension capability (no LPM)
fn usb2_extension_bos() -> Vec<u8> {
    const BOS_LEN: u8 = 5;
    const USB2_EXTENSION_LEN: u8 = 7;
    const USB2_EXTENSION: u8 = 0x02;
    let total = (BOS_LEN + USB2_EXTENSION_LEN) as u16;
    let [total_lo, total_hi] = total.to_le_bytes();
    vec![
        BOS_LEN,
        DescriptorType::Bos as u8,
        total_lo,
        total_hi,
        1,
        USB2_EXTENSION_LEN,
        DescriptorType::DeviceCapability as u8,
        USB2_EXTENSION,
        0,
        0,
        0,
        0,
    ]
}

impl DescriptorCatalog for StaticCatalog {
    fn device_descriptor(&self, _speed: DeviceSpeed) -> &[u8] {
        &self.device
    }

    fn config_descriptor(&self, speed: DeviceSpeed) -> Option<&[u8]> {
        if speed.is_high() {
            self.config_hs.as_deref()
        } else {
            Some(&self.config_fs)
        }
    }

    fn string_descriptor(&self, index: u8) -> Option<&[u8]> {
        self.strings.get(&index).map(Vec::as_slice)
    }

    fn qualifier_descriptor(&self) -> Option<&[u8]> {
        self.qualifier.as_deref()
    }

    fn bos_descriptor(&self) -> Option<&[u8]> {
        self.bos.as_deref()
    }

    fn user_string_descriptor(&self, index: u8) -> Option<&[u8]> {
        self.user_strings.get(&index).map(Vec::as_slice)
    }

    fn num_configurations(&self) -> u8 {
        1
    }
}
