//! Enumeration state machine
//!
//! ```text
//!            SET_ADDRESS(a != 0)          SET_CONFIGURATION(c != 0)
//!  Default ───────────────────> Addressed ─────────────────────────> Configured
//!     ^    <─────────────────── │    ^    <─────────────────────────     │
//!     │      SET_ADDRESS(0)     │    │      SET_CONFIGURATION(0)         │
//!     └──────────── Reset(speed) from any state ─────────────────────────┘
//! ```
//!
//! This type only holds the state and enforces which transitions are legal;
//! the session performs the side effects (transport address, function
//! activation) before committing a transition here.

use crate::error::ControlError;
use protocol::{DeviceSpeed, DeviceState, MAX_DEVICE_ADDRESS};
use tracing::info;

/// Device-wide enumeration state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Enumeration {
    state: DeviceState,
    /// Address assigned by SET_ADDRESS, 0 in Default
    address: u8,
    /// bConfigurationValue selected by SET_CONFIGURATION
    configuration: u8,
    /// DEVICE_REMOTE_WAKEUP feature, cleared by reset
    remote_wakeup: bool,
    /// Negotiated at the last bus reset
    speed: DeviceSpeed,
}

impl Enumeration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Active configuration value, 0 when unconfigured
    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    pub fn remote_wakeup(&self) -> bool {
        self.remote_wakeup
    }

    pub fn speed(&self) -> DeviceSpeed {
        self.speed
    }

    pub fn is_configured(&self) -> bool {
        self.state == DeviceState::Configured
    }

    /// Bus reset: back to Default at address 0, unconfigured
    pub fn reset(&mut self, speed: DeviceSpeed) {
        self.state = DeviceState::Default;
        self.address = 0;
        self.configuration = 0;
        self.remote_wakeup = false;
        self.speed = speed;
        info!("Bus reset at {:?} speed", speed);
    }

    /// Check that SET_ADDRESS(address) may be applied
    pub fn check_set_address(&self, address: u16) -> Result<u8, ControlError> {
        if address > MAX_DEVICE_ADDRESS {
            return Err(ControlError::MalformedRequest("device address above 127"));
        }
        if self.state == DeviceState::Configured {
            return Err(ControlError::InvalidStateTransition {
                state: self.state,
                request: "SET_ADDRESS",
            });
        }
        Ok(address as u8)
    }

    /// Commit an address already applied to the transport
    pub fn set_address(&mut self, address: u8) {
        self.address = address;
        self.state = if address == 0 {
            DeviceState::Default
        } else {
            DeviceState::Addressed
        };
        info!("Device address {} ({})", address, self.state);
    }

    /// Check that SET_CONFIGURATION may be issued at all
    pub fn check_set_configuration(&self) -> Result<(), ControlError> {
        if self.state == DeviceState::Default {
            return Err(ControlError::InvalidStateTransition {
                state: self.state,
                request: "SET_CONFIGURATION",
            });
        }
        Ok(())
    }

    /// Commit a configuration whose functions are already active
    pub fn configure(&mut self, configuration: u8) {
        debug_assert!(configuration != 0);
        self.configuration = configuration;
        self.state = DeviceState::Configured;
        info!("Configuration {} active", configuration);
    }

    /// Return to Addressed after the active configuration was torn down
    pub fn unconfigure(&mut self) {
        if self.state == DeviceState::Configured {
            info!("Configuration {} deactivated", self.configuration);
        }
        self.configuration = 0;
        if self.address != 0 {
            self.state = DeviceState::Addressed;
        }
    }

    pub fn set_remote_wakeup(&mut self, enabled: bool) {
        self.remote_wakeup = enabled;
    }

    /// Require Configured for requests that only make sense with functions active
    pub fn require_configured(&self, request: &'static str) -> Result<(), ControlError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(ControlError::InvalidStateTransition {
                state: self.state,
                request,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let e = Enumeration::new();
        assert_eq!(e.state(), DeviceState::Default);
        assert_eq!(e.address(), 0);
        assert_eq!(e.configuration(), 0);
        assert!(!e.remote_wakeup());
    }

    #[test]
    fn test_address_transitions() {
        let mut e = Enumeration::new();
        let addr = e.check_set_address(5).unwrap();
        e.set_address(addr);
        assert_eq!(e.state(), DeviceState::Addressed);

        e.set_address(0);
        assert_eq!(e.state(), DeviceState::Default);
        assert_eq!(e.address(), 0);
    }

    #[test]
    fn test_address_out_of_range() {
        let e = Enumeration::new();
        assert!(e.check_set_address(127).is_ok());
        assert!(matches!(
            e.check_set_address(128),
            Err(ControlError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_no_readdress_while_configured() {
        let mut e = Enumeration::new();
        e.set_address(3);
        e.configure(1);
        assert!(matches!(
            e.check_set_address(4),
            Err(ControlError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_configuration_requires_address() {
        let mut e = Enumeration::new();
        assert!(e.check_set_configuration().is_err());
        e.set_address(9);
        assert!(e.check_set_configuration().is_ok());

        e.configure(1);
        assert!(e.is_configured());
        e.unconfigure();
        assert_eq!(e.state(), DeviceState::Addressed);
        assert_eq!(e.configuration(), 0);
        assert_eq!(e.address(), 9);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut e = Enumeration::new();
        e.set_address(9);
        e.configure(1);
        e.set_remote_wakeup(true);

        e.reset(DeviceSpeed::High);
        assert_eq!(e.state(), DeviceState::Default);
        assert_eq!(e.address(), 0);
        assert_eq!(e.configuration(), 0);
        assert!(!e.remote_wakeup());
        assert_eq!(e.speed(), DeviceSpeed::High);
    }
}
