use std::convert::TryFrom;
use std::fmt;

use crate::error::{Error, Result};
use crate::response::ResponseToken;

/// Unused module pins that `sys set pindig` and friends can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pin {
    Gpio0,
    Gpio1,
    Gpio2,
    Gpio3,
    Gpio4,
    Gpio5,
    Gpio6,
    Gpio7,
    Gpio8,
    Gpio9,
    /// Blue LED on the LoStik.
    Gpio10,
    /// Red LED on the LoStik.
    Gpio11,
    Gpio12,
    Gpio13,
    UartCts,
    UartRts,
    Test0,
    Test1,
}

impl Pin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pin::Gpio0 => "GPIO0",
            Pin::Gpio1 => "GPIO1",
            Pin::Gpio2 => "GPIO2",
            Pin::Gpio3 => "GPIO3",
            Pin::Gpio4 => "GPIO4",
            Pin::Gpio5 => "GPIO5",
            Pin::Gpio6 => "GPIO6",
            Pin::Gpio7 => "GPIO7",
            Pin::Gpio8 => "GPIO8",
            Pin::Gpio9 => "GPIO9",
            Pin::Gpio10 => "GPIO10",
            Pin::Gpio11 => "GPIO11",
            Pin::Gpio12 => "GPIO12",
            Pin::Gpio13 => "GPIO13",
            Pin::UartCts => "UART_CTS",
            Pin::UartRts => "UART_RTS",
            Pin::Test0 => "TEST0",
            Pin::Test1 => "TEST1",
        }
    }
}

/// Pin configuration for `sys set pinmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    DigitalOut,
    DigitalIn,
    /// Only GPIO0-3 and GPIO5-13 can be analog.
    Analog,
}

impl PinMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinMode::DigitalOut => "digout",
            PinMode::DigitalIn => "digin",
            PinMode::Analog => "ana",
        }
    }
}

/// Module hardware model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// 433/868 MHz module, 16 channels, channels 0-2 fixed.
    Rn2483,
    /// 915 MHz module, 72 channels, all fixed.
    Rn2903,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Rn2483 => "RN2483",
            Model::Rn2903 => "RN2903",
        }
    }

    fn detect(version: &str) -> Option<Model> {
        if version.contains("RN2483") {
            Some(Model::Rn2483)
        } else if version.contains("RN2903") {
            Some(Model::Rn2903)
        } else {
            None
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Firmware version `X.Y.Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FirmwareVersion {
    pub fn parse(s: &str) -> Option<FirmwareVersion> {
        let parts: Vec<u32> = s
            .split('.')
            .map(|p| p.parse().ok())
            .collect::<Option<Vec<u32>>>()?;
        if parts.len() != 3 {
            return None;
        }
        Some(FirmwareVersion {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
        })
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Parsed `sys get ver` reply: `[HW] [FW] [Date] [Time]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub model: Model,
    pub firmware: FirmwareVersion,
    /// Firmware release stamp as sent by the module, e.g. `Aug 8 2017 15:11:09`.
    pub release: String,
}

impl Version {
    pub fn parse(s: &str) -> Result<Version> {
        let mut fields = s.split_whitespace();
        let model = match fields.next() {
            Some("RN2483") => Model::Rn2483,
            Some("RN2903") => Model::Rn2903,
            _ => return Err(Error::UnknownDevice(s.trim().to_string())),
        };
        let firmware = fields
            .next()
            .and_then(FirmwareVersion::parse)
            .ok_or_else(|| Error::UnknownDevice(s.trim().to_string()))?;
        let release = fields.collect::<Vec<_>>().join(" ");
        Ok(Version {
            model,
            firmware,
            release,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.model, self.firmware, self.release)
    }
}

/// Channel layout of a device variant (SKU).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceVariant {
    pub model: Model,
    /// Channels below this id have a hardware-fixed frequency.
    pub fixed_channels: u8,
    /// Number of channels the device has.
    pub max_channels: u8,
}

impl DeviceVariant {
    pub const RN2483: DeviceVariant = DeviceVariant {
        model: Model::Rn2483,
        fixed_channels: 3,
        max_channels: 16,
    };

    pub const RN2903: DeviceVariant = DeviceVariant {
        model: Model::Rn2903,
        fixed_channels: 72,
        max_channels: 72,
    };

    /// Determine the variant from a `sys get ver` reply by substring match.
    pub fn from_version(version: &str) -> Result<DeviceVariant> {
        match Model::detect(version) {
            Some(Model::Rn2483) => Ok(DeviceVariant::RN2483),
            Some(Model::Rn2903) => Ok(DeviceVariant::RN2903),
            None => Err(Error::UnknownDevice(version.trim().to_string())),
        }
    }

    pub fn is_fixed(&self, channel: u8) -> bool {
        channel < self.fixed_channels
    }
}

/// A packet received in radio mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxPacket {
    /// Received binary data
    pub data: Vec<u8>,
}

impl TryFrom<&ResponseToken> for RxPacket {
    type Error = Error;

    fn try_from(token: &ResponseToken) -> Result<Self> {
        match token {
            ResponseToken::RadioRx(payload) => Ok(RxPacket {
                data: hex::decode(payload)?,
            }),
            ResponseToken::MacRx { payload, .. } => Ok(RxPacket {
                data: hex::decode(payload)?,
            }),
            other => Err(Error::UnexpectedResponse {
                command: "radio rx".to_string(),
                token: other.clone(),
            }),
        }
    }
}
