//! Commands that can be sent to the module.
//!
//! The module groups its commands in three families, each prefixed with a keyword:
//! - `sys`: system level actions, version, EEPROM and GPIO access
//! - `mac`: LoRaWAN stack configuration, join and uplinks
//! - `radio`: direct transceiver access with the LoRaWAN stack paused
//!
//! A [`Command`] renders to exactly one line of text without terminator; the
//! transport appends `\r\n` when writing it.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::loradev::{Pin, PinMode};
use crate::transport::TERMINATOR;

/// Lowest user EEPROM address accepted by `sys get/set nvm`.
pub const NVM_MIN: u16 = 0x300;
/// Highest user EEPROM address accepted by `sys get/set nvm`.
pub const NVM_MAX: u16 = 0x3FF;
/// Lowest LoRaWAN application port.
pub const PORT_MIN: u8 = 1;
/// Highest LoRaWAN application port.
pub const PORT_MAX: u8 = 223;

// The module needs this long after a key write or `mac join` before it takes the next command.
const JOIN_SETTLE: Duration = Duration::from_millis(500);

/// Network activation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Over-the-air activation.
    Otaa,
    /// Activation by personalization.
    Abp,
}

impl Activation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activation::Otaa => "otaa",
            Activation::Abp => "abp",
        }
    }
}

/// Identifiers and keys written with `mac set <key> <hex>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacKey {
    AppEui,
    AppKey,
    DevEui,
    DevAddr,
    AppSessionKey,
    NetworkSessionKey,
}

impl MacKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MacKey::AppEui => "appeui",
            MacKey::AppKey => "appkey",
            MacKey::DevEui => "deveui",
            MacKey::DevAddr => "devaddr",
            MacKey::AppSessionKey => "appskey",
            MacKey::NetworkSessionKey => "nwkskey",
        }
    }

    /// Length of the decoded value in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            MacKey::AppEui | MacKey::DevEui => 8,
            MacKey::DevAddr => 4,
            MacKey::AppKey | MacKey::AppSessionKey | MacKey::NetworkSessionKey => 16,
        }
    }

    /// Check that `value` is hex of the right length.
    pub fn validate(&self, value: &str) -> Result<()> {
        let bytes = hex::decode(value)?;
        if bytes.len() != self.byte_len() {
            return Err(Error::InvalidCommand(format!(
                "{} must be {} bytes, got {}",
                self.as_str(),
                self.byte_len(),
                bytes.len()
            )));
        }
        Ok(())
    }
}

/// Uplink acknowledgement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uplink {
    Confirmed,
    Unconfirmed,
}

impl Uplink {
    pub fn as_str(&self) -> &'static str {
        match self {
            Uplink::Confirmed => "cnf",
            Uplink::Unconfirmed => "uncnf",
        }
    }
}

/// A command for the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // System
    /// `sys get ver`
    GetVersion,
    /// `sys get hweui`
    GetHardwareEui,
    /// `sys get vdd`
    GetVdd,
    /// `sys get nvm <addr>`
    GetNvm { address: u16 },
    /// `sys set nvm <addr> <byte>`
    SetNvm { address: u16, value: u8 },
    /// `sys set pindig <pin> <0|1>`
    SetPinDigital { pin: Pin, high: bool },
    /// `sys set pinmode <pin> <mode>`
    SetPinMode { pin: Pin, mode: PinMode },
    /// `sys get pindig <pin>`
    GetPinDigital { pin: Pin },
    /// `sys sleep <ms>`
    Sleep { millis: u32 },
    /// `sys reset`
    SysReset,

    // MAC
    /// `mac get ch freq <id>`
    GetChannelFrequency { channel: u8 },
    /// `mac get ch status <id>`
    GetChannelStatus { channel: u8 },
    /// `mac set ch freq <id> <hz>`
    SetChannelFrequency { channel: u8, hz: u32 },
    /// `mac set ch drrange <id> <min> <max>`
    SetChannelDataRateRange { channel: u8, min: u8, max: u8 },
    /// `mac set ch dcycle <id> <value>`
    SetChannelDutyCycle { channel: u8, duty_cycle: u16 },
    /// `mac set ch status <id> <on|off>`
    SetChannelStatus { channel: u8, enabled: bool },
    /// `mac set <key> <hex>`
    SetKey { key: MacKey, value: String },
    /// `mac get <param>`
    MacGet { param: String },
    /// `mac join <otaa|abp>`
    Join(Activation),
    /// `mac pause`
    Pause,
    /// `mac resume`
    Resume,
    /// `mac reset <band>`
    MacReset { band: u16 },
    /// `mac save`
    Save,
    /// `mac forceENABLE`
    ForceEnable,
    /// `mac tx <cnf|uncnf> <port> <hex>`
    Transmit {
        uplink: Uplink,
        port: u8,
        payload: Vec<u8>,
    },

    // Radio
    /// `radio set pwr <n>`
    SetRadioPower(i8),
    /// `radio set <param> <value>`
    RadioSet { param: String, value: String },
    /// `radio get <param>`
    RadioGet { param: String },
    /// `radio rx <window>`
    RadioReceive { window: u32 },
    /// `radio tx <hex>`
    RadioTransmit { payload: Vec<u8> },

    /// Any other single line of text.
    Raw(String),
}

impl Command {
    /// Build a raw command, refusing embedded line breaks.
    pub fn raw(text: impl Into<String>) -> Result<Command> {
        let cmd = Command::Raw(text.into());
        cmd.validate()?;
        Ok(cmd)
    }

    /// Build an uplink command, checking the port range.
    pub fn transmit(uplink: Uplink, port: u8, payload: &[u8]) -> Result<Command> {
        let cmd = Command::Transmit {
            uplink,
            port,
            payload: payload.to_vec(),
        };
        cmd.validate()?;
        Ok(cmd)
    }

    /// Check argument ranges that the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        match self {
            Command::GetNvm { address } | Command::SetNvm { address, .. } => {
                if !(NVM_MIN..=NVM_MAX).contains(address) {
                    return Err(Error::InvalidCommand(format!(
                        "EEPROM address {:#x} outside {:#x}..={:#x}",
                        address, NVM_MIN, NVM_MAX
                    )));
                }
            }
            Command::Transmit { port, payload, .. } => {
                if !(PORT_MIN..=PORT_MAX).contains(port) {
                    return Err(Error::InvalidCommand(format!(
                        "port {} outside {}..={}",
                        port, PORT_MIN, PORT_MAX
                    )));
                }
                if payload.is_empty() {
                    return Err(Error::InvalidCommand("empty uplink payload".to_string()));
                }
            }
            Command::RadioTransmit { payload } if payload.is_empty() => {
                return Err(Error::InvalidCommand("empty radio payload".to_string()));
            }
            Command::SetChannelDataRateRange { min, max, .. } if min > max => {
                return Err(Error::InvalidCommand(format!(
                    "data rate range {}..{} is inverted",
                    min, max
                )));
            }
            Command::SetKey { key, value } => key.validate(value)?,
            _ => {}
        }

        let line = self.to_line();
        if line.contains('\r') || line.contains('\n') {
            return Err(Error::InvalidCommand(format!(
                "line break inside command {:?}",
                line
            )));
        }
        Ok(())
    }

    /// Extra spacing this command needs before the next one, on top of the
    /// channel's configured delay.
    pub fn settle_time(&self) -> Option<Duration> {
        match self {
            Command::Join(_) | Command::SetKey { .. } => Some(JOIN_SETTLE),
            _ => None,
        }
    }

    /// Commands whose reply comes back as a single bare value. `mac pause`
    /// answers with the pause window in milliseconds.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Command::GetVersion
                | Command::Pause
                | Command::GetHardwareEui
                | Command::GetVdd
                | Command::GetNvm { .. }
                | Command::GetPinDigital { .. }
                | Command::GetChannelFrequency { .. }
                | Command::GetChannelStatus { .. }
                | Command::MacGet { .. }
                | Command::RadioGet { .. }
        )
    }

    /// Render the command text, without terminator.
    pub fn to_line(&self) -> String {
        match self {
            Command::GetVersion => "sys get ver".to_string(),
            Command::GetHardwareEui => "sys get hweui".to_string(),
            Command::GetVdd => "sys get vdd".to_string(),
            Command::GetNvm { address } => format!("sys get nvm {:X}", address),
            Command::SetNvm { address, value } => {
                format!("sys set nvm {:X} {:02X}", address, value)
            }
            Command::SetPinDigital { pin, high } => {
                format!("sys set pindig {} {}", pin.as_str(), if *high { 1 } else { 0 })
            }
            Command::SetPinMode { pin, mode } => {
                format!("sys set pinmode {} {}", pin.as_str(), mode.as_str())
            }
            Command::GetPinDigital { pin } => format!("sys get pindig {}", pin.as_str()),
            Command::Sleep { millis } => format!("sys sleep {}", millis),
            Command::SysReset => "sys reset".to_string(),

            Command::GetChannelFrequency { channel } => format!("mac get ch freq {}", channel),
            Command::GetChannelStatus { channel } => format!("mac get ch status {}", channel),
            Command::SetChannelFrequency { channel, hz } => {
                format!("mac set ch freq {} {}", channel, hz)
            }
            Command::SetChannelDataRateRange { channel, min, max } => {
                format!("mac set ch drrange {} {} {}", channel, min, max)
            }
            Command::SetChannelDutyCycle {
                channel,
                duty_cycle,
            } => format!("mac set ch dcycle {} {}", channel, duty_cycle),
            Command::SetChannelStatus { channel, enabled } => format!(
                "mac set ch status {} {}",
                channel,
                if *enabled { "on" } else { "off" }
            ),
            Command::SetKey { key, value } => format!("mac set {} {}", key.as_str(), value),
            Command::MacGet { param } => format!("mac get {}", param),
            Command::Join(mode) => format!("mac join {}", mode.as_str()),
            Command::Pause => "mac pause".to_string(),
            Command::Resume => "mac resume".to_string(),
            Command::MacReset { band } => format!("mac reset {}", band),
            Command::Save => "mac save".to_string(),
            Command::ForceEnable => "mac forceENABLE".to_string(),
            Command::Transmit {
                uplink,
                port,
                payload,
            } => format!(
                "mac tx {} {} {}",
                uplink.as_str(),
                port,
                hex::encode_upper(payload)
            ),

            Command::SetRadioPower(pwr) => format!("radio set pwr {}", pwr),
            Command::RadioSet { param, value } => format!("radio set {} {}", param, value),
            Command::RadioGet { param } => format!("radio get {}", param),
            Command::RadioReceive { window } => format!("radio rx {}", window),
            Command::RadioTransmit { payload } => {
                format!("radio tx {}", hex::encode_upper(payload))
            }

            Command::Raw(text) => text.clone(),
        }
    }

    /// Encode the command for transmission, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        let line = self.to_line();
        let mut buf = Vec::with_capacity(line.len() + TERMINATOR.len());
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(TERMINATOR);
        buf
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Line;

    #[test]
    fn test_system_commands() {
        let commands: Vec<(Command, &str)> = vec![
            (Command::Sleep { millis: 120 }, "sys sleep 120"),
            (Command::SysReset, "sys reset"),
            (
                Command::SetNvm {
                    address: NVM_MIN,
                    value: 0xA5,
                },
                "sys set nvm 300 A5",
            ),
            (
                Command::SetPinDigital {
                    pin: Pin::Gpio5,
                    high: true,
                },
                "sys set pindig GPIO5 1",
            ),
            (
                Command::SetPinMode {
                    pin: Pin::Gpio5,
                    mode: PinMode::Analog,
                },
                "sys set pinmode GPIO5 ana",
            ),
            (Command::GetVersion, "sys get ver"),
            (Command::GetNvm { address: NVM_MIN }, "sys get nvm 300"),
            (Command::GetVdd, "sys get vdd"),
            (Command::GetHardwareEui, "sys get hweui"),
        ];

        for (command, expected) in commands {
            assert_eq!(command.to_line(), expected);
        }
    }

    #[test]
    fn test_mac_channel_commands() {
        assert_eq!(
            Command::SetChannelFrequency {
                channel: 3,
                hz: 868_100_000
            }
            .to_line(),
            "mac set ch freq 3 868100000"
        );
        assert_eq!(
            Command::SetChannelDataRateRange {
                channel: 4,
                min: 0,
                max: 5
            }
            .to_line(),
            "mac set ch drrange 4 0 5"
        );
        assert_eq!(
            Command::SetChannelStatus {
                channel: 3,
                enabled: false
            }
            .to_line(),
            "mac set ch status 3 off"
        );
        assert_eq!(
            Command::GetChannelFrequency { channel: 2 }.to_line(),
            "mac get ch freq 2"
        );
    }

    #[test]
    fn test_transmit() {
        let cmd = Command::transmit(Uplink::Unconfirmed, 1, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(cmd.to_line(), "mac tx uncnf 1 DEADBEEF");
        assert!(Command::transmit(Uplink::Confirmed, 0, &[1]).is_err());
        assert!(Command::transmit(Uplink::Confirmed, 224, &[1]).is_err());
    }

    #[test]
    fn test_encode_appends_crlf() {
        assert_eq!(Command::Join(Activation::Otaa).encode(), b"mac join otaa\r\n");
    }

    #[test]
    fn test_wire_round_trip() {
        let commands = vec![
            Command::GetVersion,
            Command::Raw("mac set appeui 0011223344556677".to_string()),
            Command::RadioTransmit {
                payload: vec![0, 1, 2],
            },
        ];
        for cmd in commands {
            let wire = cmd.encode();
            assert_eq!(Line::from_wire(&wire).as_str(), cmd.to_line());
        }
    }

    #[test]
    fn test_validation() {
        assert!(Command::raw("sys get ver\r\nsys reset").is_err());
        assert!(Command::GetNvm { address: 0x2FF }.validate().is_err());
        assert!(Command::SetKey {
            key: MacKey::AppEui,
            value: "0011".to_string()
        }
        .validate()
        .is_err());
        assert!(Command::SetKey {
            key: MacKey::AppEui,
            value: "0011223344556677".to_string()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_settle_time() {
        assert_eq!(Command::Join(Activation::Abp).settle_time(), Some(JOIN_SETTLE));
        assert_eq!(Command::GetVersion.settle_time(), None);
    }

    #[test]
    fn test_is_query() {
        assert!(Command::GetVdd.is_query());
        assert!(Command::Pause.is_query());
        assert!(Command::GetChannelFrequency { channel: 3 }.is_query());
        assert!(!Command::Resume.is_query());
        assert!(!Command::SetChannelStatus {
            channel: 3,
            enabled: true
        }
        .is_query());
    }
}
