//! Channel table reconciliation.
//!
//! Walks the desired channel table in ascending id order and brings the device
//! in line with it. Channels below the variant's fixed threshold cannot be
//! retuned: a frequency mismatch there means the table describes different
//! hardware, and the whole run stops.

use tracing::{debug, info};

use crate::command::Command;
use crate::command_channel::ModemLink;
use crate::config::{ChannelDescriptor, ChannelTable};
use crate::error::{Error, Result};
use crate::loradev::DeviceVariant;
use crate::response::ResponseToken;

/// Channels handled so far out of the table size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.done == self.total
    }

    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            100.0
        } else {
            100.0 * self.done as f32 / self.total as f32
        }
    }
}

/// Ask the module for its version string and map it to a variant.
pub fn detect_variant<L: ModemLink>(link: &mut L) -> Result<(DeviceVariant, String)> {
    let timeout = link.reply_timeout();
    match link.send_and_expect(&Command::GetVersion, timeout)? {
        ResponseToken::VersionInfo(version) | ResponseToken::Value(version) => {
            let variant = DeviceVariant::from_version(&version)?;
            info!(
                "{}: {} channels, {} fixed",
                version.trim(),
                variant.max_channels,
                variant.fixed_channels
            );
            Ok((variant, version))
        }
        other => Err(Error::UnknownDevice(other.to_string())),
    }
}

/// Applies a [`ChannelTable`] to one device.
pub struct Reconciler<'a, L: ModemLink> {
    link: &'a mut L,
    variant: DeviceVariant,
    progress: Progress,
}

impl<'a, L: ModemLink> Reconciler<'a, L> {
    pub fn new(link: &'a mut L, variant: DeviceVariant) -> Self {
        Reconciler {
            link,
            variant,
            progress: Progress::default(),
        }
    }

    /// Detect the device variant first, then build the reconciler.
    pub fn detect(link: &'a mut L) -> Result<Self> {
        let (variant, _) = detect_variant(link)?;
        Ok(Self::new(link, variant))
    }

    pub fn variant(&self) -> DeviceVariant {
        self.variant
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Reconcile every channel in `table`, reporting progress after each one.
    ///
    /// Observed frequencies are written back into the table. The first error
    /// aborts the run.
    pub fn reconcile<F>(&mut self, table: &mut ChannelTable, mut on_progress: F) -> Result<Progress>
    where
        F: FnMut(Progress),
    {
        self.progress = Progress {
            done: 0,
            total: table.len(),
        };
        for descriptor in table.iter_mut() {
            self.apply(descriptor)?;
            self.progress.done += 1;
            on_progress(self.progress);
        }
        Ok(self.progress)
    }

    fn apply(&mut self, descriptor: &mut ChannelDescriptor) -> Result<()> {
        let id = descriptor.id;
        if id >= self.variant.max_channels {
            return Err(Error::ChannelOutOfRange {
                channel: id,
                max: self.variant.max_channels,
            });
        }

        let desired = match descriptor.frequency {
            Some(f) => f,
            None => {
                debug!("channel {}: blank frequency, leaving device default", id);
                return Ok(());
            }
        };

        let observed = self.query_frequency(id)?;
        descriptor.observed_frequency = Some(observed);

        if self.variant.is_fixed(id) {
            if desired != observed {
                return Err(Error::FrequencyMismatch {
                    channel: id,
                    desired,
                    observed,
                });
            }
        } else {
            self.set(Command::SetChannelFrequency {
                channel: id,
                hz: desired,
            })?;
        }

        if let Some((min, max)) = descriptor.data_rate {
            self.set(Command::SetChannelDataRateRange {
                channel: id,
                min,
                max,
            })?;
        }

        if let Some(duty_cycle) = descriptor.duty_cycle {
            self.set(Command::SetChannelDutyCycle {
                channel: id,
                duty_cycle,
            })?;
        }

        self.set(Command::SetChannelStatus {
            channel: id,
            enabled: descriptor.enabled,
        })?;
        info!(
            "channel {} set to {} Hz, {}",
            id,
            desired,
            if descriptor.enabled { "on" } else { "off" }
        );
        Ok(())
    }

    fn query_frequency(&mut self, channel: u8) -> Result<u32> {
        let cmd = Command::GetChannelFrequency { channel };
        let timeout = self.link.reply_timeout();
        let token = self.link.send_and_expect(&cmd, timeout)?;
        token
            .as_value()
            .and_then(|v| v.trim().parse().ok())
            .ok_or(Error::UnexpectedResponse {
                command: cmd.to_line(),
                token,
            })
    }

    fn set(&mut self, cmd: Command) -> Result<()> {
        let timeout = self.link.reply_timeout();
        self.link.expect_ok(&cmd, timeout)
    }
}
