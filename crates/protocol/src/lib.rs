//! Wire-level types for rust-composite-usbd
//!
//! This crate holds everything that is fixed by USB 2.0 chapter 9 or by the
//! trace file format, with no device state:
//!
//! - setup packet decoding into [`SetupRequest`]
//! - standard request, descriptor type and feature selector codes
//! - HID class request codes and the HID class descriptor
//! - byte-exact descriptor builders
//! - the transport event/primitive vocabulary ([`TransportEvent`], [`TransportOp`])
//! - trace records and their framed postcard codec
//!
//! # Example
//!
//! ```
//! use protocol::{Recipient, SetupRequest, StandardRequest};
//!
//! let req = SetupRequest::parse(&[0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]).unwrap();
//! assert_eq!(StandardRequest::from_u8(req.request), Some(StandardRequest::SetConfiguration));
//! assert_eq!(req.recipient(), Recipient::Device);
//! assert_eq!(req.value, 1);
//! ```

pub mod codec;
pub mod descriptor;
pub mod error;
pub mod hid;
pub mod integrity;
pub mod requests;
pub mod setup;
pub mod trace;
pub mod types;
pub mod version;

pub use codec::{
    MAX_FRAME_SIZE, TRACE_MAGIC, decode_framed, decode_record, encode_framed, encode_record,
    read_all, read_framed, read_header, validate_version, write_all, write_framed, write_header,
};
pub use error::{ProtocolError, Result};
pub use requests::{DescriptorType, MAX_DEVICE_ADDRESS, StandardRequest, feature, string_index};
pub use setup::{Direction, Recipient, RequestKind, RequestType, SETUP_PACKET_SIZE, SetupRequest};
pub use trace::{TraceEntry, TraceLog, TraceRecord};
pub use types::{
    DeviceSpeed, DeviceState, EndpointAddress, EndpointConfig, TransferType, TransportEvent,
    TransportOp,
};
pub use version::{CURRENT_VERSION, TraceVersion};
