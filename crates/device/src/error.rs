//! Device error types
//!
//! None of these cross the transport boundary. A [`ControlError`] raised while
//! handling a setup packet becomes a stall of both halves of endpoint 0.

use protocol::{DeviceState, EndpointAddress, ProtocolError};
use std::fmt;
use thiserror::Error;

/// What a request tried to address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Interface(u8),
    Endpoint(EndpointAddress),
    String(u8),
    Descriptor { descriptor_type: u8, index: u8 },
    Configuration(u8),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Interface(n) => write!(f, "interface {}", n),
            Target::Endpoint(ep) => write!(f, "endpoint {}", ep),
            Target::String(index) => write!(f, "string index {}", index),
            Target::Descriptor {
                descriptor_type,
                index,
            } => write!(f, "descriptor type {:#04x} index {}", descriptor_type, index),
            Target::Configuration(value) => write!(f, "configuration {}", value),
        }
    }
}

/// Control request failures, each answered with a stall
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Structural fields of the request are invalid for the request code
    #[error("Malformed request: {0}")]
    MalformedRequest(&'static str),

    /// Request code not served by this device
    #[error("Unknown request {request:#04x}")]
    UnknownRequest { request: u8 },

    /// Nothing owns the interface, endpoint, string or descriptor addressed
    #[error("Unresolved target: {0}")]
    UnresolvedTarget(Target),

    /// The target exists but cannot serve the request right now
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Request not permitted in the current device state
    #[error("{request} not allowed in {state} state")]
    InvalidStateTransition {
        state: DeviceState,
        request: &'static str,
    },
}

impl From<FunctionError> for ControlError {
    fn from(err: FunctionError) -> Self {
        match err {
            FunctionError::ForeignEndpoint(ep) => {
                ControlError::UnresolvedTarget(Target::Endpoint(ep))
            }
            FunctionError::UnsupportedRequest(request) => ControlError::UnknownRequest { request },
            other => ControlError::ResourceUnavailable(other.to_string()),
        }
    }
}

impl From<TransportError> for ControlError {
    fn from(err: TransportError) -> Self {
        ControlError::ResourceUnavailable(err.to_string())
    }
}

/// Failures local to one logical function
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FunctionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Function touched an endpoint it does not own
    #[error("Endpoint {0} is not owned by this function")]
    ForeignEndpoint(EndpointAddress),

    /// A transmission is already in flight on the IN endpoint
    #[error("Endpoint {0} is busy")]
    Busy(EndpointAddress),

    #[error("Function is not active")]
    NotActive,

    #[error("Unsupported request {0:#04x}")]
    UnsupportedRequest(u8),

    #[error("Interface {interface} has no alternate setting {alternate}")]
    UnsupportedAlternate { interface: u8, alternate: u8 },

    #[error("Payload of {len} bytes exceeds {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// The function's handler refused the data
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Descriptor error: {0}")]
    Descriptor(String),
}

impl From<ProtocolError> for FunctionError {
    fn from(err: ProtocolError) -> Self {
        FunctionError::Descriptor(err.to_string())
    }
}

/// Registration-time failures when assembling a composite device
#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("Interface {interface} already owned by {owner}")]
    InterfaceInUse { interface: u8, owner: String },

    #[error("Endpoint {endpoint} already owned by {owner}")]
    EndpointInUse {
        endpoint: EndpointAddress,
        owner: String,
    },

    #[error("Function {0} claims endpoint 0")]
    ControlEndpointClaimed(String),

    #[error("Function {0} owns no interfaces")]
    NoInterfaces(String),

    #[error("Invalid endpoint address {0}")]
    InvalidEndpoint(EndpointAddress),

    #[error("Interface numbers must be contiguous from 0, missing {0}")]
    InterfaceGap(u8),

    #[error("Descriptor error: {0}")]
    Descriptor(#[from] ProtocolError),

    #[error("Function error: {0}")]
    Function(#[from] FunctionError),
}

/// Errors returned by transport primitives
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Endpoint {0} unavailable")]
    EndpointUnavailable(EndpointAddress),

    #[error("Endpoint {0} is not open")]
    EndpointNotOpen(EndpointAddress),

    #[error("Endpoint {0} is already open")]
    EndpointAlreadyOpen(EndpointAddress),

    #[error("Transport link closed: {0}")]
    LinkClosed(String),
}

/// Type alias for control request results
pub type Result<T> = std::result::Result<T, ControlError>;
