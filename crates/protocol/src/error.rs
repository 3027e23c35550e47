//! Protocol error types

use thiserror::Error;

/// Wire-level errors: setup packet decoding, descriptor construction and
/// trace codec failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Setup packet was not exactly 8 bytes
    #[error("Setup packet must be 8 bytes, got {0}")]
    ShortSetupPacket(usize),

    /// bmRequestType carries the reserved type value (3)
    #[error("Reserved request type in bmRequestType {0:#04x}")]
    ReservedRequestType(u8),

    /// bmRequestType addresses a recipient this device does not model
    #[error("Unsupported recipient in bmRequestType {0:#04x}")]
    UnsupportedRecipient(u8),

    /// String does not fit in a single string descriptor
    #[error("String too long for a descriptor: {len} UTF-16 units (max: {max})")]
    StringTooLong { len: usize, max: usize },

    /// Descriptor exceeds its length field
    #[error("Descriptor too large: {size} bytes (max: {max})")]
    DescriptorTooLarge { size: usize, max: usize },

    /// Serialization error from postcard
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// Trace file was written by an incompatible version
    #[error(
        "Incompatible trace version: {major}.{minor} (expected {expected_major}.{expected_minor})"
    )]
    IncompatibleVersion {
        major: u8,
        minor: u8,
        expected_major: u8,
        expected_minor: u8,
    },

    /// Trace file does not start with the expected magic bytes
    #[error("Not a trace file (bad magic)")]
    BadMagic,

    /// Frame length exceeds maximum allowed size
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Incomplete frame data
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Frame payload does not match its checksum
    #[error("Frame checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// I/O error during frame operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
