//! USB and transport type definitions
//!
//! Endpoint addressing, bus speeds, endpoint configuration, and the two
//! vocabularies spoken across the transport boundary: events raised by the
//! transport ([`TransportEvent`]) and primitives invoked on it
//! ([`TransportOp`]).

use crate::setup::{Direction, SETUP_PACKET_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Endpoint address (bit 7 = IN, bits 3..0 = endpoint number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointAddress(pub u8);

impl EndpointAddress {
    /// Control endpoint, OUT half
    pub const EP0_OUT: Self = Self(0x00);
    /// Control endpoint, IN half
    pub const EP0_IN: Self = Self(0x80);

    pub fn new(number: u8, direction: Direction) -> Self {
        match direction {
            Direction::DeviceToHost => Self(0x80 | (number & 0x0F)),
            Direction::HostToDevice => Self(number & 0x0F),
        }
    }

    pub fn number(self) -> u8 {
        self.0 & 0x0F
    }

    pub fn direction(self) -> Direction {
        if self.0 & 0x80 != 0 {
            Direction::DeviceToHost
        } else {
            Direction::HostToDevice
        }
    }

    pub fn is_in(self) -> bool {
        self.direction() == Direction::DeviceToHost
    }

    /// Either half of endpoint 0
    pub fn is_control(self) -> bool {
        self.number() == 0
    }

    /// Only bit 7 and the endpoint number may be set
    pub fn is_well_formed(self) -> bool {
        self.0 & 0x70 == 0
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Bus speed the device is operating at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpeed {
    /// Low speed - 1.5 Mbps
    Low,
    /// Full speed - 12 Mbps
    #[default]
    Full,
    /// High speed - 480 Mbps
    High,
}

impl DeviceSpeed {
    /// The speed whose descriptors describe "the other" speed
    ///
    /// A high-speed capable device reports its full-speed configuration as the
    /// other-speed configuration and vice versa.
    pub fn other(self) -> Self {
        match self {
            DeviceSpeed::High => DeviceSpeed::Full,
            DeviceSpeed::Low | DeviceSpeed::Full => DeviceSpeed::High,
        }
    }

    /// Full-speed and low-speed devices share the same descriptor set
    pub fn is_high(self) -> bool {
        matches!(self, DeviceSpeed::High)
    }
}

/// Endpoint transfer type (bmAttributes bits 1..0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferType {
    pub fn attributes(self) -> u8 {
        match self {
            TransferType::Control => 0x00,
            TransferType::Isochronous => 0x01,
            TransferType::Bulk => 0x02,
            TransferType::Interrupt => 0x03,
        }
    }
}

/// Static description of one function endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub address: EndpointAddress,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
    /// bInterval at full/low speed (frames)
    pub interval_fs: u8,
    /// bInterval at high speed (exponent, 2^(n-1) microframes)
    pub interval_hs: u8,
}

impl EndpointConfig {
    /// Interrupt endpoint with the given polling intervals
    pub fn interrupt(
        address: EndpointAddress,
        max_packet_size: u16,
        interval_fs: u8,
        interval_hs: u8,
    ) -> Self {
        Self {
            address,
            transfer_type: TransferType::Interrupt,
            max_packet_size,
            interval_fs,
            interval_hs,
        }
    }

    pub fn interval(&self, speed: DeviceSpeed) -> u8 {
        if speed.is_high() {
            self.interval_hs
        } else {
            self.interval_fs
        }
    }
}

/// Visible device state (USB 2.0 section 9.1.1) once attached and powered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeviceState {
    /// After power-up or bus reset; responds at address 0
    #[default]
    Default,
    /// Unique address assigned, no configuration active
    Addressed,
    /// A configuration is active and its functions are initialized
    Configured,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Default => "default",
            DeviceState::Addressed => "addressed",
            DeviceState::Configured => "configured",
        };
        f.write_str(name)
    }
}

/// Events raised by the transport to the device core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportEvent {
    /// Bus reset detected; enumeration restarts at the given speed
    Reset { speed: DeviceSpeed },
    /// SETUP packet received on endpoint 0
    Setup { packet: [u8; SETUP_PACKET_SIZE] },
    /// Transmission armed on an IN endpoint completed
    InComplete { endpoint: EndpointAddress },
    /// Reception armed on an OUT endpoint completed
    OutComplete {
        endpoint: EndpointAddress,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
}

/// Primitives invoked by the device core on the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportOp {
    OpenEndpoint {
        endpoint: EndpointAddress,
        transfer_type: TransferType,
        max_packet_size: u16,
    },
    CloseEndpoint {
        endpoint: EndpointAddress,
    },
    Transmit {
        endpoint: EndpointAddress,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    PrepareReceive {
        endpoint: EndpointAddress,
        max_len: u16,
    },
    Stall {
        endpoint: EndpointAddress,
    },
    ClearStall {
        endpoint: EndpointAddress,
    },
    SetAddress {
        address: u8,
    },
}
