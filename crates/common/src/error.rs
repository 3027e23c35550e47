//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The device worker refused a command
    #[error("Device error: {0}")]
    Device(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
