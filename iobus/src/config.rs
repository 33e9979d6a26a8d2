//! Peripheral and system configuration.
//!
//! A configuration is an immutable value.  Changing a device's
//! settings means building a new [`PeripheralConfig`] and handing it
//! to the device, which picks it up on its next poll.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use base::prelude::*;

use crate::types::{DeviceId, DeviceKind};

/// Baud rates the serial devices accept.  Characters per second are
/// one tenth of the baud rate (one start bit, eight data bits, one
/// stop bit).
pub const SUPPORTED_BAUD_RATES: [u32; 10] = [110, 150, 300, 600, 1200, 2400, 3000, 4800, 9600, 19200];

pub const MAX_TAPE_UNITS: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnsupportedBaudRate(u32),
    TapeUnitCountOutOfRange(u8),
    MemoryFieldsOutOfRange(usize),
    /// Two peripherals claim the same device code.
    BusConflict {
        code: Unsigned6Bit,
        existing: DeviceId,
    },
    TooManyDevices,
    /// A device was offered a configuration for a different kind of
    /// device.
    KindMismatch {
        device: DeviceKind,
        offered: DeviceKind,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ConfigError::UnsupportedBaudRate(baud) => {
                write!(f, "baud rate {baud} is not supported")
            }
            ConfigError::TapeUnitCountOutOfRange(n) => write!(
                f,
                "a DECtape controller supports 1 to {MAX_TAPE_UNITS} units, not {n}"
            ),
            ConfigError::MemoryFieldsOutOfRange(n) => {
                write!(f, "memory must have 1 to {MAX_FIELDS} fields, not {n}")
            }
            ConfigError::BusConflict { code, existing } => write!(
                f,
                "device code {code:02o} is already in use by device {existing}"
            ),
            ConfigError::TooManyDevices => f.write_str("too many devices"),
            ConfigError::KindMismatch { device, offered } => {
                write!(f, "cannot configure a {device} as a {offered}")
            }
        }
    }
}

impl Error for ConfigError {}

fn check_baud_rate(baud: u32) -> Result<(), ConfigError> {
    if SUPPORTED_BAUD_RATES.contains(&baud) {
        Ok(())
    } else {
        Err(ConfigError::UnsupportedBaudRate(baud))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeleprinterConfig {
    pub baud_rate: u32,
    /// Force the eighth bit on for keyboard input and strip it from
    /// punched output, as the ASR-33 does.
    pub seven_bit: bool,
    /// Fold lower-case key presses to upper case.
    pub auto_caps: bool,
}

impl Default for TeleprinterConfig {
    fn default() -> Self {
        TeleprinterConfig {
            baud_rate: 110,
            seven_bit: true,
            auto_caps: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperTapeConfig {
    /// Reader speed; the punch always runs at 50 characters per
    /// second.
    pub baud_rate: u32,
}

impl Default for PaperTapeConfig {
    fn default() -> Self {
        PaperTapeConfig { baud_rate: 3000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecTapeConfig {
    pub units: u8,
}

impl Default for DecTapeConfig {
    fn default() -> Self {
        DecTapeConfig { units: 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineFrequency {
    Hz50,
    Hz60,
}

impl LineFrequency {
    #[must_use]
    pub fn hertz(&self) -> u32 {
        match self {
            LineFrequency::Hz50 => 50,
            LineFrequency::Hz60 => 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    pub frequency: LineFrequency,
    pub external_sync: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            frequency: LineFrequency::Hz60,
            external_sync: false,
        }
    }
}

/// The configuration of one peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PeripheralConfig {
    Teleprinter(TeleprinterConfig),
    PaperTape(PaperTapeConfig),
    Df32,
    Rf08,
    Rk8e,
    Tc08(DecTapeConfig),
    Clock(ClockConfig),
}

impl PeripheralConfig {
    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        match self {
            PeripheralConfig::Teleprinter(_) => DeviceKind::Teleprinter,
            PeripheralConfig::PaperTape(_) => DeviceKind::PaperTape,
            PeripheralConfig::Df32 => DeviceKind::Df32,
            PeripheralConfig::Rf08 => DeviceKind::Rf08,
            PeripheralConfig::Rk8e => DeviceKind::Rk8e,
            PeripheralConfig::Tc08(_) => DeviceKind::Tc08,
            PeripheralConfig::Clock(_) => DeviceKind::Clock,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            PeripheralConfig::Teleprinter(conf) => check_baud_rate(conf.baud_rate),
            PeripheralConfig::PaperTape(conf) => check_baud_rate(conf.baud_rate),
            PeripheralConfig::Tc08(conf) => {
                if (1..=MAX_TAPE_UNITS).contains(&conf.units) {
                    Ok(())
                } else {
                    Err(ConfigError::TapeUnitCountOutOfRange(conf.units))
                }
            }
            PeripheralConfig::Df32
            | PeripheralConfig::Rf08
            | PeripheralConfig::Rk8e
            | PeripheralConfig::Clock(_) => Ok(()),
        }
    }
}

/// A complete machine: installed memory and the peripherals attached
/// to the bus, in registration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfiguration {
    pub name: String,
    pub memory_fields: usize,
    pub peripherals: Vec<PeripheralConfig>,
}

impl SystemConfiguration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_FIELDS).contains(&self.memory_fields) {
            return Err(ConfigError::MemoryFieldsOutOfRange(self.memory_fields));
        }
        self.peripherals.iter().try_for_each(PeripheralConfig::validate)
    }
}

impl Default for SystemConfiguration {
    /// A PDP-8/I with 8K of core, a Teletype, the high-speed paper
    /// tape station, a DF32 disk and two DECtape transports.
    fn default() -> Self {
        SystemConfiguration {
            name: "PDP-8/I".to_string(),
            memory_fields: 2,
            peripherals: vec![
                PeripheralConfig::Teleprinter(TeleprinterConfig::default()),
                PeripheralConfig::PaperTape(PaperTapeConfig::default()),
                PeripheralConfig::Df32,
                PeripheralConfig::Tc08(DecTapeConfig::default()),
                PeripheralConfig::Clock(ClockConfig::default()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_system_is_valid() {
        assert_eq!(SystemConfiguration::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_unsupported_baud_rate() {
        let conf = PeripheralConfig::Teleprinter(TeleprinterConfig {
            baud_rate: 115,
            ..TeleprinterConfig::default()
        });
        assert_eq!(conf.validate(), Err(ConfigError::UnsupportedBaudRate(115)));
        let conf = PeripheralConfig::PaperTape(PaperTapeConfig { baud_rate: 19200 });
        assert_eq!(conf.validate(), Ok(()));
    }

    #[test]
    fn rejects_tape_unit_count() {
        for units in [0, 9] {
            let conf = PeripheralConfig::Tc08(DecTapeConfig { units });
            assert_eq!(
                conf.validate(),
                Err(ConfigError::TapeUnitCountOutOfRange(units))
            );
        }
    }

    #[test]
    fn rejects_memory_size() {
        let conf = SystemConfiguration {
            memory_fields: 9,
            ..SystemConfiguration::default()
        };
        assert_eq!(conf.validate(), Err(ConfigError::MemoryFieldsOutOfRange(9)));
    }

    #[test]
    fn json_form() {
        let conf = SystemConfiguration {
            name: "test".to_string(),
            memory_fields: 1,
            peripherals: vec![
                PeripheralConfig::Teleprinter(TeleprinterConfig {
                    baud_rate: 300,
                    seven_bit: false,
                    auto_caps: false,
                }),
                PeripheralConfig::Rk8e,
            ],
        };
        let json = serde_json::to_string(&conf).expect("configuration should serialise");
        assert!(json.contains(r#"{"kind":"Teleprinter","baud_rate":300"#));
        assert!(json.contains(r#"{"kind":"Rk8e"}"#));
        let parsed: SystemConfiguration =
            serde_json::from_str(&json).expect("configuration should parse");
        assert_eq!(parsed, conf);
    }
}
