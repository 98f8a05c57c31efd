//! Driver for LoStik USB sticks and other RN2483/RN2903 LoRa modules.
//!
//! The module speaks a line based text protocol over a 57600 baud serial port.
//! [`LoStik`] bundles the pieces needed to talk to one: the [`LineTransport`]
//! owning the port, a [`Reader`] thread that classifies every incoming line and
//! the [`CommandChannel`] that paces commands and pairs them with replies.
//!
//! ```no_run
//! use lostik::{LoStik, config::{ChannelOptions, SerialConfig}};
//!
//! let mut stick = LoStik::open(&SerialConfig::new("/dev/ttyUSB0"), ChannelOptions::default())?;
//! println!("{}", stick.version()?);
//! # Ok::<(), lostik::Error>(())
//! ```

use std::sync::Arc;
use std::time::Duration;

use serialport::{SerialPortInfo, SerialPortType};
use tracing::info;

pub mod command;
pub mod command_channel;
pub mod config;
pub mod error;
pub mod join;
pub mod loradev;
pub mod reader;
pub mod reconcile;
pub mod response;
pub mod transport;

pub use command::{Command, Uplink};
pub use command_channel::{CommandChannel, ModemLink};
pub use error::{Error, Result};
pub use join::{ConnectionState, JoinSession};
pub use loradev::{DeviceVariant, Pin, RxPacket, Version};
pub use reader::{Reader, Reply};
pub use reconcile::{Progress, Reconciler};
pub use response::ResponseToken;
pub use transport::LineTransport;

use config::{ChannelOptions, ChannelTable, JoinConfig, SerialConfig};

/// USB vendor id of the CH340 bridge on LoStik sticks.
pub const LOSTIK_USB_VID: u16 = 0x1A86;

/// One opened module.
pub struct LoStik {
    channel: CommandChannel,
    reader: Reader,
    transport: Arc<LineTransport>,
}

impl LoStik {
    /// Open the serial port and start reading from it.
    pub fn open(serial: &SerialConfig, options: ChannelOptions) -> Result<LoStik> {
        Self::from_transport(LineTransport::open(serial)?, options)
    }

    /// Start the reader thread on an already built transport.
    pub fn from_transport(transport: LineTransport, options: ChannelOptions) -> Result<LoStik> {
        let transport = Arc::new(transport);
        let (reader, events) = Reader::spawn(Arc::clone(&transport))?;
        Ok(LoStik {
            channel: CommandChannel::new(Arc::clone(&transport), events, options),
            reader,
            transport,
        })
    }

    pub fn address(&self) -> &str {
        self.transport.address()
    }

    /// Direct access to the command channel for anything the helpers below don't cover.
    pub fn channel(&mut self) -> &mut CommandChannel {
        &mut self.channel
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Ask for the raw version line and parse it.
    pub fn version(&mut self) -> Result<Version> {
        let text = self.query(&Command::GetVersion)?;
        Version::parse(&text)
    }

    pub fn variant(&mut self) -> Result<DeviceVariant> {
        reconcile::detect_variant(&mut self.channel).map(|(variant, _)| variant)
    }

    /// Preprogrammed EUI of the module, as hex.
    pub fn hardware_eui(&mut self) -> Result<String> {
        self.query(&Command::GetHardwareEui)
    }

    /// Supply voltage in millivolts.
    pub fn vdd(&mut self) -> Result<u16> {
        self.query_number(&Command::GetVdd)
    }

    /// Drive a GPIO pin, e.g. the LEDs on GPIO10 and GPIO11.
    pub fn set_pin(&mut self, pin: Pin, high: bool) -> Result<()> {
        let timeout = self.channel.reply_timeout();
        self.channel.expect_ok(&Command::SetPinDigital { pin, high }, timeout)
    }

    /// Pause the LoRaWAN stack so raw radio commands are accepted.
    ///
    /// Returns how long the stack can stay paused, in milliseconds.
    pub fn pause_mac(&mut self) -> Result<u32> {
        self.query_number(&Command::Pause)
    }

    pub fn resume_mac(&mut self) -> Result<()> {
        let timeout = self.channel.reply_timeout();
        self.channel.expect_ok(&Command::Resume, timeout)
    }

    /// Reset the LoRaWAN stack to the defaults of `band` (868 or 433 on RN2483).
    pub fn reset_mac(&mut self, band: u16) -> Result<()> {
        let timeout = self.channel.reply_timeout();
        self.channel.expect_ok(&Command::MacReset { band }, timeout)
    }

    pub fn set_radio_power(&mut self, power: i8) -> Result<()> {
        let timeout = self.channel.reply_timeout();
        self.channel.expect_ok(&Command::SetRadioPower(power), timeout)
    }

    /// Read a radio setting such as `mod`, `freq` or `sf`.
    pub fn radio_get(&mut self, param: &str) -> Result<String> {
        self.query(&Command::RadioGet {
            param: param.to_string(),
        })
    }

    /// Put the radio in receive mode. `0` keeps it listening until a packet arrives.
    pub fn radio_receive(&mut self, window: u32) -> Result<()> {
        let timeout = self.channel.reply_timeout();
        self.channel.expect_ok(&Command::RadioReceive { window }, timeout)
    }

    /// Wait for the outcome of [`radio_receive`](Self::radio_receive).
    ///
    /// `Ok(None)` covers both a timeout and `radio_err`: either way the radio
    /// has to be armed again.
    pub fn next_packet(&mut self, timeout: Duration) -> Result<Option<RxPacket>> {
        match self.channel.next_reply(timeout)? {
            Some(reply) => match reply.token {
                ResponseToken::RadioRx(_) => RxPacket::try_from(&reply.token).map(Some),
                ResponseToken::RadioError => Ok(None),
                token => Err(Error::UnexpectedResponse {
                    command: Command::RadioReceive { window: 0 }.to_line(),
                    token,
                }),
            },
            None => Ok(None),
        }
    }

    /// Send a raw radio packet and wait until it is out.
    pub fn radio_transmit(&mut self, payload: &[u8], timeout: Duration) -> Result<()> {
        let cmd = Command::RadioTransmit {
            payload: payload.to_vec(),
        };
        let reply_timeout = self.channel.reply_timeout();
        self.channel.expect_ok(&cmd, reply_timeout)?;
        match self.channel.next_reply(timeout)? {
            Some(Reply {
                token: ResponseToken::RadioTxOk,
                ..
            }) => Ok(()),
            Some(reply) => Err(Error::CommandRejected {
                command: cmd.to_line(),
                token: reply.token,
            }),
            None => Err(Error::NoResponse {
                command: cmd.to_line(),
                timeout_ms: timeout.as_millis(),
            }),
        }
    }

    /// A join session borrowing this stick's channel.
    pub fn join_session(&mut self, config: JoinConfig) -> Result<JoinSession<'_>> {
        JoinSession::new(&mut self.channel, config)
    }

    /// Join and block until connected or the retries are used up.
    pub fn join(&mut self, config: JoinConfig) -> Result<()> {
        let mut session = self.join_session(config)?;
        session.run()?;
        info!("joined after {} attempts", session.attempts_issued());
        Ok(())
    }

    /// Detect the variant and bring the device's channels in line with `table`.
    pub fn configure_channels<F>(
        &mut self,
        table: &mut ChannelTable,
        on_progress: F,
    ) -> Result<Progress>
    where
        F: FnMut(Progress),
    {
        Reconciler::detect(&mut self.channel)?.reconcile(table, on_progress)
    }

    /// Stop the reader and close the port. Safe to call more than once.
    pub fn close(&mut self) {
        self.reader.shutdown();
    }

    fn query(&mut self, cmd: &Command) -> Result<String> {
        if !cmd.is_query() {
            return Err(Error::InvalidCommand(format!("'{}' does not return a value", cmd)));
        }
        let timeout = self.channel.reply_timeout();
        let token = self.channel.send_and_expect(cmd, timeout)?;
        match token {
            ResponseToken::Value(value) | ResponseToken::VersionInfo(value) => Ok(value),
            token => Err(Error::UnexpectedResponse {
                command: cmd.to_line(),
                token,
            }),
        }
    }

    fn query_number<T: std::str::FromStr>(&mut self, cmd: &Command) -> Result<T> {
        let value = self.query(cmd)?;
        value.trim().parse().map_err(|_| Error::UnexpectedResponse {
            command: cmd.to_line(),
            token: ResponseToken::Value(value),
        })
    }
}

impl Drop for LoStik {
    fn drop(&mut self) {
        self.close();
    }
}

/// Returns a default usb serial device for macos or unix.
/// It might not be present or called otherwise depending on
/// the system configuration.
pub fn get_default_usb_serial() -> String {
    if cfg!(target_os = "macos") {
        String::from("/dev/tty.wchusbserial1410")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn available_ports() -> Result<Vec<SerialPortInfo>> {
    serialport::available_ports().map_err(|source| Error::Connect {
        address: String::from("serial port list"),
        source,
    })
}

fn is_lostik(port: &SerialPortInfo) -> bool {
    matches!(&port.port_type, SerialPortType::UsbPort(info) if info.vid == LOSTIK_USB_VID)
}

/// Names of the serial ports that look like a LoStik.
pub fn find_lostik_ports() -> Result<Vec<String>> {
    Ok(available_ports()?
        .into_iter()
        .filter(is_lostik)
        .map(|p| p.port_name)
        .collect())
}

/// Print every serial port on the system, marking the ones that look like a LoStik.
pub fn dump_all_serial_ports() -> Result<()> {
    let ports = available_ports()?;
    match ports.len() {
        0 => println!("No ports found."),
        1 => println!("Found 1 port:"),
        n => println!("Found {} ports:", n),
    };
    for p in ports {
        let marker = if is_lostik(&p) { " (LoStik)" } else { "" };
        println!("  {}{}", p.port_name, marker);
        match p.port_type {
            SerialPortType::UsbPort(info) => {
                println!("    Type: USB");
                println!("    VID:{:04x} PID:{:04x}", info.vid, info.pid);
                println!(
                    "     Serial Number: {}",
                    info.serial_number.as_deref().unwrap_or("")
                );
                println!(
                    "      Manufacturer: {}",
                    info.manufacturer.as_deref().unwrap_or("")
                );
                println!("           Product: {}", info.product.as_deref().unwrap_or(""));
            }
            SerialPortType::BluetoothPort => println!("    Type: Bluetooth"),
            SerialPortType::PciPort => println!("    Type: PCI"),
            SerialPortType::Unknown => println!("    Type: Unknown"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    fn usb(vid: u16) -> SerialPortInfo {
        SerialPortInfo {
            port_name: format!("/dev/ttyUSB{}", vid % 10),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid,
                pid: 0x7523,
                serial_number: None,
                manufacturer: None,
                product: None,
            }),
        }
    }

    #[test]
    fn test_lostik_detection_by_vendor() {
        assert!(is_lostik(&usb(LOSTIK_USB_VID)));
        assert!(!is_lostik(&usb(0x10C4)));
        assert!(!is_lostik(&SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: SerialPortType::PciPort,
        }));
    }

    #[test]
    fn test_default_usb_serial() {
        assert!(get_default_usb_serial().starts_with("/dev/"));
    }
}
