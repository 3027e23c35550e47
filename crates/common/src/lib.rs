//! Common utilities for rust-composite-usbd
//!
//! Shared by the simulator and the tests: logging setup, the common error
//! type, and the async channel bridge between the host runtime and the
//! thread that owns the device session.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{
    DeviceBridge, DeviceCommand, DeviceNotice, DeviceWorker, SessionSnapshot,
    create_device_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
