//! Error types for the LoStik driver.

use std::io;

use thiserror::Error;

use crate::response::ResponseToken;

/// Errors that can occur while talking to a LoStik module.
#[derive(Debug, Error)]
pub enum Error {
    /// The serial device could not be opened (not found, permission, busy).
    #[error("cannot open {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: serialport::Error,
    },

    /// Writing a command line failed, e.g. the stick was unplugged.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// Reading from the stream failed for a reason other than a timeout.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// The stream was closed, locally or by the device going away.
    #[error("connection closed")]
    Closed,

    /// A command expected exactly one reply and none arrived in time.
    #[error("no response to '{command}' within {timeout_ms} ms")]
    NoResponse { command: String, timeout_ms: u128 },

    /// The device answered, but not with `ok`.
    #[error("'{command}' rejected by device: {token}")]
    CommandRejected {
        command: String,
        token: ResponseToken,
    },

    /// The device answered with something that makes no sense for the command.
    #[error("unexpected reply to '{command}': {token}")]
    UnexpectedResponse {
        command: String,
        token: ResponseToken,
    },

    /// A hardware-fixed channel reports a different frequency than configured.
    #[error("frequency {desired} for channel {channel} does not match device ({observed})")]
    FrequencyMismatch {
        channel: u8,
        desired: u32,
        observed: u32,
    },

    /// `sys get ver` returned something that is neither an RN2483 nor an RN2903.
    #[error("unknown device: '{0}'")]
    UnknownDevice(String),

    /// The configuration names a channel the device does not have.
    #[error("channel {channel} out of range, device has {max} channels")]
    ChannelOutOfRange { channel: u8, max: u8 },

    /// The join state machine gave up after the configured number of attempts.
    #[error("network join failed after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    /// An uplink was requested while not joined.
    #[error("not connected to a network")]
    NotConnected,

    /// A command could not be built (embedded newline, value out of range).
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A hex payload or key did not decode.
    #[error("invalid hex payload: {0}")]
    InvalidPayload(#[from] hex::FromHexError),

    /// Configuration could not be read or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for errors that mean the link to the device is gone.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Write(_) | Error::Read(_) | Error::Closed | Error::Connect { .. }
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Universal `Result` wrapper for the LoStik interface.
pub type Result<T> = std::result::Result<T, Error>;
