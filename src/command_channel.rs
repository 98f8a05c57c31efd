//! Command/response correlation.
//!
//! The module processes one command at a time and needs a short pause before it
//! accepts the next. [`CommandChannel`] enforces that spacing on every write and
//! pairs request/reply commands with the next line the reader thread delivers.
//! Retrying is left to the callers that know what a `busy` means for them.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::warn;

use crate::command::Command;
use crate::config::ChannelOptions;
use crate::error::{Error, Result};
use crate::reader::{ReaderEvent, Reply};
use crate::response::ResponseToken;
use crate::transport::LineTransport;

/// The operations the join and reconciliation logic need from a modem link.
pub trait ModemLink {
    /// Write a command and wait out the inter-command delay. No reply is read.
    fn send(&mut self, cmd: &Command) -> Result<()>;

    /// Write a command and classify the single line that answers it.
    fn send_and_expect(&mut self, cmd: &Command, timeout: Duration) -> Result<ResponseToken>;

    /// Default timeout for [`send_and_expect`](Self::send_and_expect).
    fn reply_timeout(&self) -> Duration;

    /// Like `send_and_expect`, but anything other than `ok` is an error.
    fn expect_ok(&mut self, cmd: &Command, timeout: Duration) -> Result<()> {
        match self.send_and_expect(cmd, timeout)? {
            ResponseToken::Ok => Ok(()),
            token => Err(Error::CommandRejected {
                command: cmd.to_line(),
                token,
            }),
        }
    }
}

/// Writes commands to the transport and reads replies from the reader thread.
pub struct CommandChannel {
    transport: Arc<LineTransport>,
    events: Receiver<ReaderEvent>,
    options: ChannelOptions,
    ready_at: Instant,
    closed: bool,
}

impl CommandChannel {
    pub fn new(
        transport: Arc<LineTransport>,
        events: Receiver<ReaderEvent>,
        options: ChannelOptions,
    ) -> Self {
        CommandChannel {
            transport,
            events,
            options,
            ready_at: Instant::now(),
            closed: false,
        }
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.transport.is_closed()
    }

    // Waits until the previous command had its delay, writes, and books the next slot.
    fn write(&mut self, cmd: &Command) -> Result<()> {
        cmd.validate()?;
        if self.closed {
            return Err(Error::Closed);
        }
        let now = Instant::now();
        if self.ready_at > now {
            thread::sleep(self.ready_at - now);
        }
        let written = self.transport.write_line(cmd);
        if let Err(ref e) = written {
            if e.is_transport() {
                self.closed = true;
            }
        }
        written?;
        let delay = cmd
            .settle_time()
            .map_or(self.options.command_delay, |t| t.max(self.options.command_delay));
        self.ready_at = Instant::now() + delay;
        Ok(())
    }

    /// Wait up to `timeout` for the next line from the device.
    ///
    /// `Ok(None)` means nothing arrived in time. A closed or failed stream is an error.
    pub fn next_reply(&mut self, timeout: Duration) -> Result<Option<Reply>> {
        if self.closed {
            return Err(Error::Closed);
        }
        match self.events.recv_timeout(timeout) {
            Ok(event) => self.accept(event).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                Err(Error::Closed)
            }
        }
    }

    /// Every line that has already arrived, without blocking.
    pub fn pending_replies(&mut self) -> Result<Vec<Reply>> {
        let mut replies = Vec::new();
        loop {
            if self.closed {
                return Err(Error::Closed);
            }
            match self.events.try_recv() {
                Ok(event) => replies.push(self.accept(event)?),
                Err(TryRecvError::Empty) => return Ok(replies),
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    return Err(Error::Closed);
                }
            }
        }
    }

    fn accept(&mut self, event: ReaderEvent) -> Result<Reply> {
        let reply = event.into_reply();
        if reply.is_err() {
            self.closed = true;
        }
        reply
    }
}

impl ModemLink for CommandChannel {
    fn send(&mut self, cmd: &Command) -> Result<()> {
        self.write(cmd)?;
        let now = Instant::now();
        if self.ready_at > now {
            thread::sleep(self.ready_at - now);
        }
        Ok(())
    }

    fn send_and_expect(&mut self, cmd: &Command, timeout: Duration) -> Result<ResponseToken> {
        // whatever arrived before the command went out cannot be its reply
        for stale in self.pending_replies()? {
            warn!("discarding unsolicited line '{}'", stale.line);
        }
        self.write(cmd)?;
        match self.next_reply(timeout)? {
            Some(reply) => Ok(reply.token),
            None => Err(Error::NoResponse {
                command: cmd.to_line(),
                timeout_ms: timeout.as_millis(),
            }),
        }
    }

    fn reply_timeout(&self) -> Duration {
        self.options.reply_timeout
    }
}
