//! GET_DESCRIPTOR resolution for recipient = Device
//!
//! Picks which blob answers a request; never builds descriptor bytes itself.

use crate::catalog::DescriptorCatalog;
use crate::error::{ControlError, Target};
use crate::router::CompositeRouter;
use protocol::{DescriptorType, DeviceSpeed, SetupRequest, string_index};

/// Resolve a device-level GET_DESCRIPTOR to the bytes to return
///
/// Configuration and other-speed configuration share the per-speed blobs;
/// byte 1 is rewritten to the type the host asked for.
pub fn resolve_descriptor(
    catalog: &dyn DescriptorCatalog,
    router: &CompositeRouter,
    request: &SetupRequest,
    speed: DeviceSpeed,
) -> Result<Vec<u8>, ControlError> {
    let descriptor_type = request.descriptor_type();
    let index = request.descriptor_index();
    let unresolved = ControlError::UnresolvedTarget(Target::Descriptor {
        descriptor_type,
        index,
    });

    match DescriptorType::from_u8(descriptor_type) {
        Some(DescriptorType::Device) => Ok(catalog.device_descriptor(speed).to_vec()),
        Some(DescriptorType::DeviceQualifier) => catalog
            .qualifier_descriptor()
            .map(<[u8]>::to_vec)
            .ok_or(unresolved),
        Some(DescriptorType::Bos) => catalog.bos_descriptor().map(<[u8]>::to_vec).ok_or(unresolved),
        Some(DescriptorType::Configuration) => {
            configuration(catalog, index, speed, DescriptorType::Configuration).ok_or(unresolved)
        }
        Some(DescriptorType::OtherSpeedConfiguration) => {
            // Only high-speed capable devices have another speed to describe
            if catalog.qualifier_descriptor().is_none() {
                return Err(unresolved);
            }
            configuration(
                catalog,
                index,
                speed.other(),
                DescriptorType::OtherSpeedConfiguration,
            )
            .ok_or(unresolved)
        }
        Some(DescriptorType::String) => {
            resolve_string(catalog, router, index).ok_or(ControlError::UnresolvedTarget(Target::String(index)))
        }
        _ => Err(unresolved),
    }
}

fn configuration(
    catalog: &dyn DescriptorCatalog,
    index: u8,
    speed: DeviceSpeed,
    as_type: DescriptorType,
) -> Option<Vec<u8>> {
    if index >= catalog.num_configurations() {
        return None;
    }
    let mut blob = catalog.config_descriptor(speed)?.to_vec();
    if let Some(kind) = blob.get_mut(1) {
        *kind = as_type as u8;
    }
    Some(blob)
}

/// Device strings, then function strings, then the user-string hook
fn resolve_string(
    catalog: &dyn DescriptorCatalog,
    router: &CompositeRouter,
    index: u8,
) -> Option<Vec<u8>> {
    if string_index::is_device_string(index) {
        return catalog.string_descriptor(index).map(<[u8]>::to_vec);
    }
    router
        .route_string(index)
        .or_else(|| catalog.user_string_descriptor(index).map(<[u8]>::to_vec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DeviceIdentity, StaticCatalog};
    use crate::hid::{HidFunction, HidFunctionConfig, NullHandler};
    use protocol::descriptor::decode_string_descriptor;
    use protocol::{EndpointAddress, EndpointConfig};

    fn setup(high_speed: bool) -> (StaticCatalog, CompositeRouter) {
        let mut router = CompositeRouter::new();
        router
            .register(Box::new(
                HidFunction::new(
                    HidFunctionConfig {
                        name: "mouse".into(),
                        interface: 0,
                        subclass: 1,
                        protocol: 2,
                        string_index: 4,
                        string: "HID Mouse Interface".into(),
                        report_descriptor: vec![0x05, 0x01, 0xC0],
                        in_endpoint: EndpointConfig::interrupt(EndpointAddress(0x81), 4, 10, 7),
                        out_endpoint: None,
                    },
                    NullHandler,
                )
                .unwrap(),
            ))
            .unwrap();
        let identity = DeviceIdentity {
            high_speed,
            configuration_string: Some((6, "Default".into())),
            ..DeviceIdentity::default()
        };
        let catalog = StaticCatalog::build(&identity, &router).unwrap();
        (catalog, router)
    }

    fn get(descriptor_type: u8, index: u8) -> SetupRequest {
        SetupRequest::parse(&[0x80, 0x06, index, descriptor_type, 0x09, 0x04, 0xFF, 0x00]).unwrap()
    }

    #[test]
    fn test_configuration_byte1_rewrite() {
        let (catalog, router) = setup(true);

        let fs = resolve_descriptor(&catalog, &router, &get(0x02, 0), DeviceSpeed::Full).unwrap();
        assert_eq!(fs[1], 0x02);

        let other = resolve_descriptor(&catalog, &router, &get(0x07, 0), DeviceSpeed::High).unwrap();
        assert_eq!(other[1], 0x07);
        assert_eq!(fs[0], other[0]);
        assert_eq!(fs[2..], other[2..]);
    }

    #[test]
    fn test_other_speed_needs_qualifier() {
        let (catalog, router) = setup(false);
        assert!(matches!(
            resolve_descriptor(&catalog, &router, &get(0x07, 0), DeviceSpeed::Full),
            Err(ControlError::UnresolvedTarget(Target::Descriptor { .. }))
        ));
        assert!(resolve_descriptor(&catalog, &router, &get(0x06, 0), DeviceSpeed::Full).is_err());
    }

    #[test]
    fn test_configuration_index_out_of_range() {
        let (catalog, router) = setup(false);
        assert!(resolve_descriptor(&catalog, &router, &get(0x02, 1), DeviceSpeed::Full).is_err());
    }

    #[test]
    fn test_string_resolution_order() {
        let (catalog, router) = setup(false);

        let product = resolve_descriptor(&catalog, &router, &get(0x03, 2), DeviceSpeed::Full).unwrap();
        assert_eq!(
            decode_string_descriptor(&product).as_deref(),
            Some("Composite HID Device")
        );

        let interface = resolve_descriptor(&catalog, &router, &get(0x03, 4), DeviceSpeed::Full).unwrap();
        assert_eq!(
            decode_string_descriptor(&interface).as_deref(),
            Some("HID Mouse Interface")
        );

        let user = resolve_descriptor(&catalog, &router, &get(0x03, 6), DeviceSpeed::Full).unwrap();
        assert_eq!(decode_string_descriptor(&user).as_deref(), Some("Default"));

        assert_eq!(
            resolve_descriptor(&catalog, &router, &get(0x03, 0xEE), DeviceSpeed::Full),
            Err(ControlError::UnresolvedTarget(Target::String(0xEE)))
        );
    }

    #[test]
    fn test_unknown_type() {
        let (catalog, router) = setup(false);
        assert!(resolve_descriptor(&catalog, &router, &get(0x04, 0), DeviceSpeed::Full).is_err());
        assert!(resolve_descriptor(&catalog, &router, &get(0x0F, 0), DeviceSpeed::Full).is_err());
    }
}
