//! Device-side control plane for a composite USB peripheral
//!
//! [`DeviceSession`] is the entry point. It consumes transport events
//! (reset, setup packets, endpoint completions), runs the chapter 9
//! enumeration state machine and the endpoint 0 control pipe, answers
//! standard requests from a [`DescriptorCatalog`], and forwards class and
//! vendor requests through the [`CompositeRouter`] to the
//! [`LogicalFunction`] owning the addressed interface.
//!
//! ```
//! use device::{
//!     CompositeRouter, DeviceIdentity, DeviceSession, HidFunction, HidFunctionConfig,
//!     NullHandler, RecordingTransport, StaticCatalog,
//! };
//! use protocol::{DeviceSpeed, DeviceState, EndpointAddress, EndpointConfig};
//!
//! let mut router = CompositeRouter::new();
//! router.register(Box::new(HidFunction::new(
//!     HidFunctionConfig {
//!         name: "mouse".into(),
//!         interface: 0,
//!         subclass: 1,
//!         protocol: 2,
//!         string_index: 4,
//!         string: "HID Mouse Interface".into(),
//!         report_descriptor: vec![0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, 0xC0],
//!         in_endpoint: EndpointConfig::interrupt(EndpointAddress(0x81), 4, 10, 7),
//!         out_endpoint: None,
//!     },
//!     NullHandler,
//! )?))?;
//!
//! let catalog = StaticCatalog::build(&DeviceIdentity::default(), &router)?;
//! let mut session = DeviceSession::new(RecordingTransport::new(), Box::new(catalog), router);
//!
//! session.reset(DeviceSpeed::Full);
//! session.on_setup(&[0x00, 0x05, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00]);
//! assert_eq!(session.state(), DeviceState::Addressed);
//! assert_eq!(session.address(), 7);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod catalog;
pub mod control;
pub mod error;
pub mod function;
pub mod hid;
pub mod recording;
pub mod resolve;
pub mod router;
pub mod session;
mod standard;
pub mod state;
pub mod transport;

pub use catalog::{CONFIGURATION_VALUE, DescriptorCatalog, DeviceIdentity, StaticCatalog};
pub use control::{ControlPayload, ControlPipe, ControlStage};
pub use error::{CompositeError, ControlError, FunctionError, Result, Target, TransportError};
pub use function::{ControlOutcome, FunctionPort, LogicalFunction};
pub use hid::{HidFunction, HidFunctionConfig, NullHandler, ReportHandler};
pub use recording::RecordingTransport;
pub use resolve::resolve_descriptor;
pub use router::CompositeRouter;
pub use session::DeviceSession;
pub use state::Enumeration;
pub use transport::TransportPort;
