//! Simulator configuration management

use crate::presets;
use anyhow::{Context, Result, anyhow};
use device::{DeviceIdentity, HidFunctionConfig};
use protocol::{DeviceSpeed, EndpointAddress, EndpointConfig, string_index};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub simulator: SimulatorSettings,
    pub device: DeviceSettings,
    #[serde(default)]
    pub host: HostSettings,
    /// Logical functions, in interface order
    #[serde(default)]
    pub functions: Vec<FunctionSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorSettings {
    pub log_level: String,
    /// Where to write the captured trace (None = no capture)
    #[serde(default)]
    pub trace_out: Option<PathBuf>,
}

/// Device identity and power attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub vendor_id: u16,
    pub product_id: u16,
    /// bcdDevice
    #[serde(default = "DeviceSettings::default_bcd")]
    pub device_version: u16,
    /// bcdUSB
    #[serde(default = "DeviceSettings::default_bcd")]
    pub usb_version: u16,
    #[serde(default = "DeviceSettings::default_max_packet_size0")]
    pub max_packet_size0: u8,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
    #[serde(default)]
    pub configuration_string: Option<StringSettings>,
    #[serde(default)]
    pub self_powered: bool,
    #[serde(default)]
    pub remote_wakeup: bool,
    #[serde(default = "DeviceSettings::default_max_power")]
    pub max_power_ma: u16,
    /// Also describe a high-speed configuration and a device qualifier
    #[serde(default)]
    pub high_speed: bool,
    /// Serve a BOS descriptor with a USB 2.0 extension capability
    #[serde(default)]
    pub bos: bool,
}

impl DeviceSettings {
    fn default_bcd() -> u16 {
        0x0200
    }

    fn default_max_packet_size0() -> u8 {
        64
    }

    fn default_max_power() -> u16 {
        100
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringSettings {
    pub index: u8,
    pub text: String,
}

/// The emulated host's side of the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Bus speed the host resets the device at (full, high)
    #[serde(default)]
    pub speed: DeviceSpeed,
    /// Address assigned with SET_ADDRESS
    #[serde(default = "HostSettings::default_address")]
    pub address: u8,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            speed: DeviceSpeed::Full,
            address: Self::default_address(),
        }
    }
}

impl HostSettings {
    fn default_address() -> u8 {
        5
    }
}

/// One HID logical function
///
/// # Example Configuration
/// ```toml
/// [[functions]]
/// name = "mouse"
/// interface = 0
/// string_index = 4
/// string = "HID Mouse Interface"
/// subclass = 1
/// protocol = 2
/// report_preset = "mouse"
///
/// [functions.in_endpoint]
/// address = 0x81
/// max_packet_size = 4
/// interval_fs = 10
/// interval_hs = 7
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSettings {
    pub name: String,
    pub interface: u8,
    pub string_index: u8,
    pub string: String,
    #[serde(default)]
    pub subclass: u8,
    #[serde(default)]
    pub protocol: u8,
    /// Built-in report descriptor (mouse, vendor)
    #[serde(default)]
    pub report_preset: Option<String>,
    /// Report descriptor bytes as hex; takes precedence over the preset
    #[serde(default)]
    pub report_hex: Option<String>,
    pub in_endpoint: EndpointSettings,
    #[serde(default)]
    pub out_endpoint: Option<EndpointSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub address: u8,
    pub max_packet_size: u16,
    /// bInterval in frames at full speed
    pub interval_fs: u8,
    /// bInterval exponent at high speed
    pub interval_hs: u8,
}

impl EndpointSettings {
    fn to_config(self) -> EndpointConfig {
        EndpointConfig::interrupt(
            EndpointAddress(self.address),
            self.max_packet_size,
            self.interval_fs,
            self.interval_hs,
        )
    }
}

impl FunctionSettings {
    /// Resolve the report descriptor bytes
    pub fn report_descriptor(&self) -> Result<Vec<u8>> {
        if let Some(hex) = &self.report_hex {
            return presets::parse_hex(hex)
                .with_context(|| format!("Function '{}': bad report_hex", self.name));
        }
        let preset = self
            .report_preset
            .as_deref()
            .ok_or_else(|| anyhow!("Function '{}' has no report descriptor", self.name))?;
        presets::lookup(preset).map(<[u8]>::to_vec).ok_or_else(|| {
            anyhow!(
                "Function '{}': unknown report preset '{}', must be one of: {}",
                self.name,
                preset,
                presets::PRESET_NAMES.join(", ")
            )
        })
    }

    pub fn to_function_config(&self) -> Result<HidFunctionConfig> {
        Ok(HidFunctionConfig {
            name: self.name.clone(),
            interface: self.interface,
            subclass: self.subclass,
            protocol: self.protocol,
            string_index: self.string_index,
            string: self.string.clone(),
            report_descriptor: self.report_descriptor()?,
            in_endpoint: self.in_endpoint.to_config(),
            out_endpoint: self.out_endpoint.map(EndpointSettings::to_config),
        })
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            simulator: SimulatorSettings {
                log_level: "info".to_string(),
                trace_out: None,
            },
            device: DeviceSettings {
                vendor_id: 0x1234,
                product_id: 0x5678,
                device_version: DeviceSettings::default_bcd(),
                usb_version: DeviceSettings::default_bcd(),
                max_packet_size0: DeviceSettings::default_max_packet_size0(),
                manufacturer: "Your Manufacturer".to_string(),
                product: "Composite HID Device".to_string(),
                serial_number: "00000000001A".to_string(),
                configuration_string: Some(StringSettings {
                    index: 6,
                    text: "Composite Config".to_string(),
                }),
                self_powered: true,
                remote_wakeup: false,
                max_power_ma: DeviceSettings::default_max_power(),
                high_speed: false,
                bos: false,
            },
            host: HostSettings::default(),
            functions: vec![
                FunctionSettings {
                    name: "mouse".to_string(),
                    interface: 0,
                    string_index: 4,
                    string: "HID Mouse Interface".to_string(),
                    subclass: 1,
                    protocol: 2,
                    report_preset: Some("mouse".to_string()),
                    report_hex: None,
                    in_endpoint: EndpointSettings {
                        address: 0x81,
                        max_packet_size: 4,
                        interval_fs: 10,
                        interval_hs: 7,
                    },
                    out_endpoint: None,
                },
                FunctionSettings {
                    name: "vendor".to_string(),
                    interface: 1,
                    string_index: 5,
                    string: "Custom HID Interface".to_string(),
                    subclass: 0,
                    protocol: 0,
                    report_preset: Some("vendor".to_string()),
                    report_hex: None,
                    in_endpoint: EndpointSettings {
                        address: 0x82,
                        max_packet_size: 9,
                        interval_fs: 1,
                        interval_hs: 4,
                    },
                    out_endpoint: Some(EndpointSettings {
                        address: 0x02,
                        max_packet_size: 9,
                        interval_fs: 1,
                        interval_hs: 4,
                    }),
                },
            ],
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/rust-composite-usbd/simulator.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: SimulatorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("rust-composite-usbd").join("simulator.toml")
        } else {
            PathBuf::from(".config/rust-composite-usbd/simulator.toml")
        }
    }

    /// Trace output path with `~` expanded
    pub fn trace_out(&self) -> Option<PathBuf> {
        self.simulator.trace_out.as_deref().map(expand_path)
    }

    pub fn identity(&self) -> DeviceIdentity {
        let device = &self.device;
        DeviceIdentity {
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            device_version: device.device_version,
            usb_version: device.usb_version,
            max_packet_size0: device.max_packet_size0,
            manufacturer: device.manufacturer.clone(),
            product: device.product.clone(),
            serial_number: device.serial_number.clone(),
            configuration_string: device
                .configuration_string
                .as_ref()
                .map(|s| (s.index, s.text.clone())),
            self_powered: device.self_powered,
            remote_wakeup: device.remote_wakeup,
            max_power_ma: device.max_power_ma,
            high_speed: device.high_speed,
            bos: device.bos,
        }
    }

    pub fn function_configs(&self) -> Result<Vec<HidFunctionConfig>> {
        self.functions
            .iter()
            .map(FunctionSettings::to_function_config)
            .collect()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.simulator.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.simulator.log_level,
                valid_levels.join(", ")
            ));
        }

        if ![8, 16, 32, 64].contains(&self.device.max_packet_size0) {
            return Err(anyhow!(
                "Invalid max_packet_size0 {}, must be one of: 8, 16, 32, 64",
                self.device.max_packet_size0
            ));
        }

        if self.host.address == 0 || u16::from(self.host.address) > protocol::MAX_DEVICE_ADDRESS {
            return Err(anyhow!(
                "Invalid host address {}, must be 1-127",
                self.host.address
            ));
        }

        if self.functions.is_empty() {
            return Err(anyhow!("At least one function must be configured"));
        }

        let mut interfaces = BTreeSet::new();
        let mut endpoints = BTreeSet::new();
        let mut strings = BTreeSet::new();

        if let Some(config_string) = &self.device.configuration_string {
            Self::validate_string_index(config_string.index, "configuration_string")?;
            strings.insert(config_string.index);
        }

        for function in &self.functions {
            if !interfaces.insert(function.interface) {
                return Err(anyhow!(
                    "Interface {} is used by more than one function",
                    function.interface
                ));
            }

            Self::validate_string_index(function.string_index, &function.name)?;
            if !strings.insert(function.string_index) {
                return Err(anyhow!(
                    "String index {} is used more than once",
                    function.string_index
                ));
            }

            Self::validate_endpoint(&function.in_endpoint, true, &function.name)?;
            if !endpoints.insert(function.in_endpoint.address) {
                return Err(anyhow!(
                    "Endpoint {:#04x} is used more than once",
                    function.in_endpoint.address
                ));
            }
            if let Some(out) = &function.out_endpoint {
                Self::validate_endpoint(out, false, &function.name)?;
                if !endpoints.insert(out.address) {
                    return Err(anyhow!("Endpoint {:#04x} is used more than once", out.address));
                }
            }

            function.report_descriptor()?;
        }

        Ok(())
    }

    /// Indices 0-3 belong to LANGID, manufacturer, product and serial number
    fn validate_string_index(index: u8, owner: &str) -> Result<()> {
        if index < string_index::FIRST_USER {
            return Err(anyhow!(
                "Invalid string index {} for '{}', must be {} or higher",
                index,
                owner,
                string_index::FIRST_USER
            ));
        }
        Ok(())
    }

    fn validate_endpoint(endpoint: &EndpointSettings, is_in: bool, owner: &str) -> Result<()> {
        let address = EndpointAddress(endpoint.address);
        if !address.is_well_formed() || address.is_control() {
            return Err(anyhow!(
                "Invalid endpoint {:#04x} for '{}', must be endpoint 1-15",
                endpoint.address,
                owner
            ));
        }
        if address.is_in() != is_in {
            return Err(anyhow!(
                "Endpoint {:#04x} for '{}' has the wrong direction bit, expected {}",
                endpoint.address,
                owner,
                if is_in { "IN (0x80)" } else { "OUT" }
            ));
        }
        if endpoint.max_packet_size == 0 || endpoint.max_packet_size > 64 {
            return Err(anyhow!(
                "Invalid max_packet_size {} for endpoint {:#04x}, must be 1-64",
                endpoint.max_packet_size,
                endpoint.address
            ));
        }
        if endpoint.interval_fs == 0 || endpoint.interval_hs == 0 || endpoint.interval_hs > 16 {
            return Err(anyhow!(
                "Invalid polling interval for endpoint {:#04x}",
                endpoint.address
            ));
        }
        Ok(())
    }
}

/// Expand a leading `~` in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimulatorConfig::default();
        assert_eq!(config.simulator.log_level, "info");
        assert_eq!(config.functions.len(), 2);
        assert_eq!(config.host.speed, DeviceSpeed::Full);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = SimulatorConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SimulatorConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.simulator.log_level, parsed.simulator.log_level);
        assert_eq!(config.functions.len(), parsed.functions.len());
        assert_eq!(parsed.functions[1].out_endpoint.unwrap().address, 0x02);
        assert_eq!(
            parsed.device.configuration_string,
            config.device.configuration_string
        );
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = SimulatorConfig::default();
        config.simulator.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.simulator.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_ep0_size() {
        let mut config = SimulatorConfig::default();
        config.device.max_packet_size0 = 12;
        assert!(config.validate().is_err());
        config.device.max_packet_size0 = 8;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_duplicates() {
        let mut config = SimulatorConfig::default();
        config.functions[1].interface = 0;
        assert!(config.validate().is_err());

        let mut config = SimulatorConfig::default();
        config.functions[1].in_endpoint.address = 0x81;
        assert!(config.validate().is_err());

        let mut config = SimulatorConfig::default();
        config.functions[1].string_index = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_endpoint_direction() {
        let mut config = SimulatorConfig::default();
        config.functions[0].in_endpoint.address = 0x01;
        assert!(config.validate().is_err());

        let mut config = SimulatorConfig::default();
        config.functions[1].out_endpoint.as_mut().unwrap().address = 0x83;
        assert!(config.validate().is_err());

        let mut config = SimulatorConfig::default();
        config.functions[0].in_endpoint.address = 0x80;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_reserved_string_index() {
        let mut config = SimulatorConfig::default();
        config.functions[0].string_index = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_report_descriptor_sources() {
        let mut config = SimulatorConfig::default();
        assert_eq!(config.functions[0].report_descriptor().unwrap().len(), 50);
        assert_eq!(config.functions[1].report_descriptor().unwrap().len(), 29);

        config.functions[0].report_hex = Some("05 01 C0".to_string());
        assert_eq!(config.functions[0].report_descriptor().unwrap(), vec![0x05, 0x01, 0xC0]);

        config.functions[1].report_preset = Some("joystick".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identity_and_functions() {
        let config = SimulatorConfig::default();
        let identity = config.identity();
        assert_eq!(identity.vendor_id, 0x1234);
        assert_eq!(identity.configuration_string, Some((6, "Composite Config".to_string())));

        let functions = config.function_configs().unwrap();
        assert_eq!(functions[0].in_endpoint.address, EndpointAddress(0x81));
        assert_eq!(functions[1].out_endpoint.unwrap().max_packet_size, 9);
    }

    #[test]
    fn test_expand_path() {
        let plain = expand_path(Path::new("/tmp/trace.bin"));
        assert_eq!(plain, PathBuf::from("/tmp/trace.bin"));

        let expanded = expand_path(Path::new("~/trace.bin"));
        assert!(!expanded.to_string_lossy().starts_with('~') || dirs::home_dir().is_none());
    }
}
