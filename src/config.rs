//! Configuration handed to the transport, the command channel, the join state
//! machine and the channel reconciler.
//!
//! Everything here is plain data, built once and passed by reference. A whole
//! [`DeviceConfig`] can be loaded from YAML:
//!
//! ```yaml
//! serial:
//!   address: /dev/ttyUSB0
//! options:
//!   command_delay_ms: 200
//! join:
//!   mode:
//!     otaa:
//!       app_eui: "0011223344556677"
//!       app_key: "00112233445566778899AABBCCDDEEFF"
//!   max_retries: 5
//! channels:
//!   ch0: ""
//!   ch3: "868100000, on"
//!   ch4: "868300000, on, 0, 5, 302"
//! ```

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::command::{Activation, Command, MacKey};
use crate::error::{Error, Result};

/// Baud rate every LoStik firmware uses.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_command_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_reply_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_max_retries() -> u32 {
    10
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(20)
}

/// Where and how to open the serial device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SerialConfig {
    /// Port path, e.g. `/dev/ttyUSB0`.
    pub address: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Upper bound for a single blocking read.
    #[serde(
        rename = "read_timeout_ms",
        default = "default_read_timeout",
        deserialize_with = "millis"
    )]
    pub read_timeout: Duration,
}

impl SerialConfig {
    /// Default settings for the device at `address`: 57600 baud, 1 second read timeout.
    pub fn new(address: &str) -> Self {
        SerialConfig {
            address: address.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: default_read_timeout(),
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

/// Timing of the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ChannelOptions {
    /// Minimum spacing between two commands on the wire.
    #[serde(
        rename = "command_delay_ms",
        default = "default_command_delay",
        deserialize_with = "millis"
    )]
    pub command_delay: Duration,
    /// How long `send_and_expect` waits for its reply.
    #[serde(
        rename = "reply_timeout_ms",
        default = "default_reply_timeout",
        deserialize_with = "millis"
    )]
    pub reply_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions {
            command_delay: default_command_delay(),
            reply_timeout: default_reply_timeout(),
        }
    }
}

/// OTAA identifiers. Empty strings leave the value stored on the device alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OtaaCredentials {
    pub app_eui: String,
    pub app_key: String,
    pub dev_eui: String,
}

/// ABP session parameters. Empty strings leave the value stored on the device alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AbpCredentials {
    pub dev_addr: String,
    pub app_session_key: String,
    pub network_session_key: String,
}

/// Activation mode plus the credentials it needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMode {
    Otaa(OtaaCredentials),
    Abp(AbpCredentials),
}

impl JoinMode {
    pub fn activation(&self) -> Activation {
        match self {
            JoinMode::Otaa(_) => Activation::Otaa,
            JoinMode::Abp(_) => Activation::Abp,
        }
    }

    fn keys(&self) -> Vec<(MacKey, &str)> {
        match self {
            JoinMode::Otaa(c) => vec![
                (MacKey::AppEui, c.app_eui.as_str()),
                (MacKey::AppKey, c.app_key.as_str()),
                (MacKey::DevEui, c.dev_eui.as_str()),
            ],
            JoinMode::Abp(c) => vec![
                (MacKey::DevAddr, c.dev_addr.as_str()),
                (MacKey::AppSessionKey, c.app_session_key.as_str()),
                (MacKey::NetworkSessionKey, c.network_session_key.as_str()),
            ],
        }
    }

    /// The command set of one join attempt: every supplied credential, then `mac join`.
    pub fn commands(&self) -> Vec<Command> {
        let mut commands: Vec<Command> = self
            .keys()
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| Command::SetKey {
                key,
                value: value.to_string(),
            })
            .collect();
        commands.push(Command::Join(self.activation()));
        commands
    }
}

/// Settings of the join state machine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JoinConfig {
    /// Written as a single-key map, `otaa: {...}` or `abp: {...}`.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub mode: JoinMode,
    /// Number of join attempts before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How long one attempt may stay unanswered before it counts as failed.
    #[serde(
        rename = "attempt_timeout_ms",
        default = "default_attempt_timeout",
        deserialize_with = "millis"
    )]
    pub attempt_timeout: Duration,
}

impl JoinConfig {
    pub fn new(mode: JoinMode) -> Self {
        JoinConfig {
            mode,
            max_retries: default_max_retries(),
            attempt_timeout: default_attempt_timeout(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Check credential lengths and the retry ceiling.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".to_string()));
        }
        for (key, value) in self.mode.keys() {
            if !value.is_empty() {
                key.validate(value)?;
            }
        }
        Ok(())
    }
}

/// Desired configuration of one logical channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub id: u8,
    /// `None`: the channel keeps its device default and is not touched.
    pub frequency: Option<u32>,
    pub enabled: bool,
    /// Inclusive data rate range.
    pub data_rate: Option<(u8, u8)>,
    pub duty_cycle: Option<u16>,
    /// Frequency the device reported, filled in during reconciliation.
    pub observed_frequency: Option<u32>,
}

impl ChannelDescriptor {
    /// Parse `frequency, status, dr_min, dr_max, duty_cycle`; all but the
    /// frequency are optional, quotes around fields are ignored.
    pub fn parse(id: u8, entry: &str) -> Result<ChannelDescriptor> {
        let fields: Vec<&str> = entry
            .split(',')
            .map(|f| f.trim().trim_matches('"').trim())
            .collect();
        let bad = |what: &str, value: &str| {
            Error::Config(format!("channel {}: invalid {} '{}'", id, what, value))
        };

        let frequency = match fields.first().copied().unwrap_or("") {
            "" => None,
            f => Some(f.parse::<u32>().map_err(|_| bad("frequency", f))?),
        };

        let mut descriptor = ChannelDescriptor {
            id,
            frequency,
            enabled: true,
            data_rate: None,
            duty_cycle: None,
            observed_frequency: None,
        };
        if frequency.is_none() {
            return Ok(descriptor);
        }

        if let Some(status) = fields.get(1).copied().filter(|s| !s.is_empty()) {
            descriptor.enabled = match status.to_ascii_lowercase().as_str() {
                "on" => true,
                "off" => false,
                _ => return Err(bad("status", status)),
            };
        }

        match (fields.get(2).copied(), fields.get(3).copied()) {
            (Some(min), Some(max)) => {
                let min: u8 = min.parse().map_err(|_| bad("dr_min", min))?;
                let max: u8 = max.parse().map_err(|_| bad("dr_max", max))?;
                if min > max {
                    return Err(bad("data rate range", &format!("{} {}", min, max)));
                }
                descriptor.data_rate = Some((min, max));
            }
            (Some(min), None) => return Err(bad("data rate range, missing dr_max", min)),
            _ => {}
        }

        if let Some(dcycle) = fields.get(4).copied() {
            descriptor.duty_cycle = Some(dcycle.parse().map_err(|_| bad("duty_cycle", dcycle))?);
        }

        Ok(descriptor)
    }
}

/// A channel table value as written in the file: the comma-field string, or a
/// bare frequency.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChannelEntry {
    Text(String),
    Number(u64),
}

/// Desired channel table, iterated in ascending channel id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BTreeMap<String, ChannelEntry>")]
pub struct ChannelTable {
    channels: BTreeMap<u8, ChannelDescriptor>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(key, entry)` pairs; keys are `chN` or `N`.
    pub fn parse_entries<'a, I>(entries: I) -> Result<ChannelTable>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut table = ChannelTable::new();
        for (key, entry) in entries {
            let id = parse_channel_key(key)?;
            table.insert(ChannelDescriptor::parse(id, entry)?)?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, descriptor: ChannelDescriptor) -> Result<()> {
        if self.channels.contains_key(&descriptor.id) {
            return Err(Error::Config(format!(
                "channel {} configured twice",
                descriptor.id
            )));
        }
        self.channels.insert(descriptor.id, descriptor);
        Ok(())
    }

    pub fn get(&self, id: u8) -> Option<&ChannelDescriptor> {
        self.channels.get(&id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.channels.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChannelDescriptor> {
        self.channels.values_mut()
    }
}

impl TryFrom<BTreeMap<String, ChannelEntry>> for ChannelTable {
    type Error = Error;

    fn try_from(raw: BTreeMap<String, ChannelEntry>) -> Result<Self> {
        let mut table = ChannelTable::new();
        for (key, entry) in raw {
            let id = parse_channel_key(&key)?;
            let entry = match entry {
                ChannelEntry::Text(s) => s,
                ChannelEntry::Number(n) => n.to_string(),
            };
            table.insert(ChannelDescriptor::parse(id, &entry)?)?;
        }
        Ok(table)
    }
}

fn parse_channel_key(key: &str) -> Result<u8> {
    let digits = key.trim();
    let digits = digits.strip_prefix("ch").unwrap_or(digits).trim();
    digits
        .parse()
        .map_err(|_| Error::Config(format!("invalid channel key '{}'", key)))
}

/// Everything one run needs, as stored in a YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub serial: SerialConfig,
    #[serde(default)]
    pub options: ChannelOptions,
    #[serde(default)]
    pub join: Option<JoinConfig>,
    #[serde(default)]
    pub channels: ChannelTable,
}

impl DeviceConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<DeviceConfig> {
        let config: DeviceConfig = serde_yaml::from_str(yaml)?;
        if let Some(join) = &config.join {
            join.validate()?;
        }
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<DeviceConfig> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }
}
