//! Background reader thread.
//!
//! One thread owns the read side of the transport, classifies every line and
//! forwards it over a channel. Whoever holds the receiving end (normally the
//! [`CommandChannel`](crate::command_channel::CommandChannel)) consumes replies
//! in arrival order while writes happen on another thread.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::response::ResponseToken;
use crate::transport::{Line, LineTransport, ReadEvent};

/// A line together with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub line: Line,
    pub token: ResponseToken,
}

/// What the reader thread reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    Reply(Reply),
    /// Stream ended or was closed; no further events follow.
    Closed,
    /// Read error; no further events follow.
    Failed { kind: io::ErrorKind, message: String },
}

/// Handle to the reader thread. Dropping it closes the transport and joins the thread.
pub struct Reader {
    transport: Arc<LineTransport>,
    handle: Option<JoinHandle<()>>,
}

impl Reader {
    /// Start reading `transport` on a new thread.
    pub fn spawn(transport: Arc<LineTransport>) -> Result<(Reader, Receiver<ReaderEvent>)> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let thread_transport = Arc::clone(&transport);
        let handle = thread::Builder::new()
            .name(format!("lostik-reader {}", transport.address()))
            .spawn(move || read_loop(&thread_transport, &tx))
            .map_err(Error::Read)?;
        Ok((
            Reader {
                transport,
                handle: Some(handle),
            },
            rx,
        ))
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Close the transport and wait for the thread to notice.
    pub fn shutdown(&mut self) {
        self.transport.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("reader thread for {} panicked", self.transport.address());
            }
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_loop(transport: &LineTransport, tx: &Sender<ReaderEvent>) {
    loop {
        match transport.read_line() {
            Ok(ReadEvent::Line(line)) => {
                let token = ResponseToken::classify(line.as_str());
                if tx.send(ReaderEvent::Reply(Reply { line, token })).is_err() {
                    debug!("nobody listening, reader stops");
                    transport.close();
                    return;
                }
            }
            Ok(ReadEvent::Overlong(line)) => {
                let token = ResponseToken::Unrecognized(line.as_str().to_string());
                if tx.send(ReaderEvent::Reply(Reply { line, token })).is_err() {
                    transport.close();
                    return;
                }
            }
            Ok(ReadEvent::Timeout) => {}
            Ok(ReadEvent::Closed) => {
                debug!("reader for {} done", transport.address());
                let _ = tx.send(ReaderEvent::Closed);
                return;
            }
            Err(e) => {
                error!("reading from {} failed: {}", transport.address(), e);
                let (kind, message) = match e {
                    Error::Read(io) => (io.kind(), io.to_string()),
                    other => (io::ErrorKind::Other, other.to_string()),
                };
                let _ = tx.send(ReaderEvent::Failed { kind, message });
                transport.close();
                return;
            }
        }
    }
}

impl ReaderEvent {
    /// Convert terminal events into the matching error.
    pub(crate) fn into_reply(self) -> Result<Reply> {
        match self {
            ReaderEvent::Reply(reply) => Ok(reply),
            ReaderEvent::Closed => Err(Error::Closed),
            ReaderEvent::Failed { kind, message } => {
                Err(Error::Read(io::Error::new(kind, message)))
            }
        }
    }
}
