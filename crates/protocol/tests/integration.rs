//! Protocol Integration Tests
//!
//! Tests for the protocol crate covering:
//! - Setup packet decoding for every standard request the device serves
//! - Descriptor assembly for a two-interface composite configuration
//! - Trace files with mixed events and primitives
//! - Edge cases and error conditions
//!
//! Run with: `cargo test -p protocol`

use protocol::descriptor::{
    ConfigHeader, DescriptorIter, InterfaceDescriptor, decode_string_descriptor,
    encode_string_descriptor, write_endpoint,
};
use protocol::hid::{self, hid_descriptor};
use protocol::{
    DescriptorType, DeviceSpeed, Direction, EndpointAddress, EndpointConfig, ProtocolError,
    Recipient, RequestKind, SetupRequest, StandardRequest, TraceEntry, TraceLog, TransportEvent,
    TransportOp, read_all, write_all,
};
use std::io::Cursor;

// ============================================================================
// Test Utilities
// ============================================================================

/// Configuration body for a mouse on interface 0 and a vendor channel on
/// interface 1, laid out the way a composite HID device reports itself.
fn composite_body(speed: DeviceSpeed) -> Vec<u8> {
    let mut body = Vec::new();

    InterfaceDescriptor {
        number: 0,
        alternate_setting: 0,
        num_endpoints: 1,
        class: hid::HID_CLASS,
        subclass: hid::subclass::BOOT,
        protocol: hid::protocol::MOUSE,
        string_index: 4,
    }
    .write_to(&mut body);
    body.extend_from_slice(&hid_descriptor(50).unwrap());
    write_endpoint(
        &mut body,
        &EndpointConfig::interrupt(EndpointAddress(0x81), 4, 10, 7),
        speed,
    );

    InterfaceDescriptor {
        number: 1,
        alternate_setting: 0,
        num_endpoints: 2,
        class: hid::HID_CLASS,
        subclass: hid::subclass::NONE,
        protocol: hid::protocol::NONE,
        string_index: 5,
    }
    .write_to(&mut body);
    body.extend_from_slice(&hid_descriptor(29).unwrap());
    write_endpoint(
        &mut body,
        &EndpointConfig::interrupt(EndpointAddress(0x82), 9, 10, 7),
        speed,
    );
    write_endpoint(
        &mut body,
        &EndpointConfig::interrupt(EndpointAddress(0x02), 9, 10, 7),
        speed,
    );

    body
}

fn setup(raw: [u8; 8]) -> SetupRequest {
    SetupRequest::parse(&raw).unwrap()
}

// ============================================================================
// Setup Packet Tests
// ============================================================================

#[test]
fn test_enumeration_requests_decode() {
    let cases: [([u8; 8], StandardRequest, Direction, Recipient); 6] = [
        (
            [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00],
            StandardRequest::GetDescriptor,
            Direction::DeviceToHost,
            Recipient::Device,
        ),
        (
            [0x00, 0x05, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00],
            StandardRequest::SetAddress,
            Direction::HostToDevice,
            Recipient::Device,
        ),
        (
            [0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00],
            StandardRequest::SetConfiguration,
            Direction::HostToDevice,
            Recipient::Device,
        ),
        (
            [0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00],
            StandardRequest::GetStatus,
            Direction::DeviceToHost,
            Recipient::Device,
        ),
        (
            [0x02, 0x01, 0x00, 0x00, 0x81, 0x00, 0x00, 0x00],
            StandardRequest::ClearFeature,
            Direction::HostToDevice,
            Recipient::Endpoint,
        ),
        (
            [0x81, 0x0A, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00],
            StandardRequest::GetInterface,
            Direction::DeviceToHost,
            Recipient::Interface,
        ),
    ];

    for (raw, request, direction, recipient) in cases {
        let req = setup(raw);
        assert_eq!(StandardRequest::from_u8(req.request), Some(request));
        assert_eq!(req.kind(), RequestKind::Standard);
        assert_eq!(req.direction(), direction);
        assert_eq!(req.recipient(), recipient);
        assert_eq!(req.to_bytes(), raw);
    }
}

#[test]
fn test_interface_report_descriptor_request() {
    // GET_DESCRIPTOR(Report) addressed to interface 1
    let req = setup([0x81, 0x06, 0x00, 0x22, 0x01, 0x00, 0x1D, 0x00]);
    assert_eq!(
        DescriptorType::from_u8(req.descriptor_type()),
        Some(DescriptorType::Report)
    );
    assert_eq!(req.interface(), 1);
    assert_eq!(req.length, 29);
}

#[test]
fn test_endpoint_request_targets_low_index_byte() {
    let req = setup([0x02, 0x03, 0x00, 0x00, 0x82, 0x00, 0x00, 0x00]);
    assert_eq!(EndpointAddress(req.endpoint()), EndpointAddress(0x82));
}

#[test]
fn test_vendor_request_decodes() {
    let req = setup([0xC1, 0x42, 0x00, 0x00, 0x01, 0x00, 0x04, 0x00]);
    assert_eq!(req.kind(), RequestKind::Vendor);
    assert_eq!(req.interface(), 1);
}

#[test]
fn test_malformed_packets() {
    assert!(matches!(
        SetupRequest::parse(&[0; 9]),
        Err(ProtocolError::ShortSetupPacket(9))
    ));
    assert!(matches!(
        SetupRequest::parse(&[0x1F, 0, 0, 0, 0, 0, 0, 0]),
        Err(ProtocolError::UnsupportedRecipient(0x1F))
    ));
}

// ============================================================================
// Descriptor Tests
// ============================================================================

#[test]
fn test_composite_configuration_layout() {
    let body = composite_body(DeviceSpeed::Full);
    let header = ConfigHeader {
        num_interfaces: 2,
        configuration_value: 1,
        configuration_index: 0,
        attributes: protocol::descriptor::CONFIG_ATTR_SELF_POWERED,
        max_power: 0x32,
    };
    let blob = header.assemble(&body).unwrap();

    // 9 config + 2 x (9 interface + 9 HID) + 3 x 7 endpoint
    assert_eq!(blob.len(), 9 + 36 + 21);
    assert_eq!(u16::from_le_bytes([blob[2], blob[3]]) as usize, blob.len());

    let types: Vec<u8> = DescriptorIter::new(&blob).map(|(t, _)| t).collect();
    assert_eq!(types, vec![0x02, 0x04, 0x21, 0x05, 0x04, 0x21, 0x05, 0x05]);

    let endpoints: Vec<u8> = DescriptorIter::new(&blob)
        .filter(|(t, _)| *t == DescriptorType::Endpoint as u8)
        .map(|(_, d)| d[2])
        .collect();
    assert_eq!(endpoints, vec![0x81, 0x82, 0x02]);
}

#[test]
fn test_speed_only_changes_intervals() {
    let fs = composite_body(DeviceSpeed::Full);
    let hs = composite_body(DeviceSpeed::High);
    assert_eq!(fs.len(), hs.len());

    let differing: Vec<usize> = fs
        .iter()
        .zip(hs.iter())
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(i, _)| i)
        .collect();
    // One bInterval per endpoint
    assert_eq!(differing.len(), 3);
}

#[test]
fn test_interface_strings() {
    for text in ["HID Mouse Interface", "Custom HID Interface", "Composite Config"] {
        let desc = encode_string_descriptor(text).unwrap();
        assert_eq!(desc[1], DescriptorType::String as u8);
        assert_eq!(decode_string_descriptor(&desc).as_deref(), Some(text));
    }
}

#[test]
fn test_non_ascii_string() {
    let desc = encode_string_descriptor("Maus \u{00e9}").unwrap();
    assert_eq!(desc[0], 2 + 6 * 2);
    assert_eq!(desc[12], 0xE9);
    assert_eq!(desc[13], 0x00);
}

// ============================================================================
// Trace File Tests
// ============================================================================

#[test]
fn test_trace_file_with_enumeration() {
    let mut log = TraceLog::new();
    log.push(TraceEntry::Event(TransportEvent::Reset {
        speed: DeviceSpeed::Full,
    }));
    log.push(TraceEntry::Op(TransportOp::OpenEndpoint {
        endpoint: EndpointAddress::EP0_OUT,
        transfer_type: protocol::TransferType::Control,
        max_packet_size: 64,
    }));
    log.push(TraceEntry::Event(TransportEvent::Setup {
        packet: [0x00, 0x05, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00],
    }));
    log.push(TraceEntry::Op(TransportOp::SetAddress { address: 7 }));
    log.push(TraceEntry::Event(TransportEvent::OutComplete {
        endpoint: EndpointAddress(0x02),
        data: (0..9).collect(),
    }));

    let mut buffer = Vec::new();
    write_all(&mut buffer, log.records()).unwrap();

    let records = read_all(&mut Cursor::new(buffer)).unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records, log.records());
    assert_eq!(records.iter().filter(|r| r.is_event()).count(), 3);
}

#[test]
fn test_trace_file_empty() {
    let mut buffer = Vec::new();
    write_all(&mut buffer, &[]).unwrap();
    assert_eq!(buffer.len(), 7);
    assert!(read_all(&mut Cursor::new(buffer)).unwrap().is_empty());
}

#[test]
fn test_trace_file_missing_header() {
    let result = read_all(&mut Cursor::new(Vec::new()));
    assert!(matches!(result, Err(ProtocolError::Io(_))));
}
