//! In-memory stand-in for a LoStik on the other end of a serial cable.

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use lostik::config::ChannelOptions;
use lostik::{LineTransport, LoStik};

pub const READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Produces the lines the module sends back for one received command line.
pub type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// What the module side puts on the wire.
pub enum Chunk {
    Data(Vec<u8>),
    /// The next read fails, as when the stick is pulled.
    Fail(io::ErrorKind, &'static str),
}

/// Read half: behaves like a serial port with a read timeout.
pub struct ModemOutput {
    rx: Receiver<Chunk>,
    buf: Vec<u8>,
}

impl Read for ModemOutput {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.buf.is_empty() {
            match self.rx.recv_timeout(READ_TIMEOUT) {
                Ok(Chunk::Data(bytes)) => self.buf = bytes,
                Ok(Chunk::Fail(kind, message)) => return Err(io::Error::new(kind, message)),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"))
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = out.len().min(self.buf.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.buf.drain(..n);
        Ok(n)
    }
}

/// Write half: splits what the host writes into lines and answers them.
pub struct ModemInput {
    tx: Option<Sender<Chunk>>,
    partial: Vec<u8>,
    /// Lines accepted before every further write fails with `BrokenPipe`.
    lines_left: Option<usize>,
    responder: Responder,
    written: Arc<Mutex<Vec<String>>>,
}

impl Write for ModemInput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.lines_left == Some(0) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        self.partial.extend_from_slice(buf);
        while let Some(pos) = self.partial.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = self.partial.drain(..pos + 2).collect();
            let line = String::from_utf8_lossy(&line[..pos]).into_owned();
            self.written.lock().push(line.clone());
            if let Some(left) = self.lines_left.as_mut() {
                *left = left.saturating_sub(1);
            }
            for reply in (self.responder)(&line) {
                if let Some(tx) = &self.tx {
                    let _ = tx.send(Chunk::Data(format!("{}\r\n", reply).into_bytes()));
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Handle kept by the test to inspect traffic and inject unsolicited lines.
#[derive(Clone)]
pub struct ModemHandle {
    written: Arc<Mutex<Vec<String>>>,
    tx: Sender<Chunk>,
}

impl ModemHandle {
    /// Every command line the host has written so far.
    pub fn written(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    /// Send a line as if the module had emitted it on its own.
    pub fn emit(&self, line: &str) {
        let _ = self.tx.send(Chunk::Data(format!("{}\r\n", line).into_bytes()));
    }

    /// Make the host's next read fail.
    pub fn fail_read(&self, message: &'static str) {
        let _ = self.tx.send(Chunk::Fail(io::ErrorKind::BrokenPipe, message));
    }
}

/// Build a transport wired to a scripted modem.
///
/// The handle holds a sender, so the stream only ends once the transport is
/// closed; use [`scripted_without_handle`] to test end-of-stream.
pub fn scripted<F>(responder: F) -> (LineTransport, ModemHandle)
where
    F: FnMut(&str) -> Vec<String> + Send + 'static,
{
    scripted_with(responder, None)
}

/// Like [`scripted`], but writes fail once `lines` command lines went through.
pub fn scripted_with<F>(responder: F, lines: Option<usize>) -> (LineTransport, ModemHandle)
where
    F: FnMut(&str) -> Vec<String> + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded();
    let written = Arc::new(Mutex::new(Vec::new()));
    let handle = ModemHandle {
        written: Arc::clone(&written),
        tx: tx.clone(),
    };
    let transport = LineTransport::from_stream(
        "mock",
        READ_TIMEOUT,
        ModemOutput { rx, buf: Vec::new() },
        ModemInput {
            tx: Some(tx),
            partial: Vec::new(),
            lines_left: lines,
            responder: Box::new(responder),
            written,
        },
    );
    (transport, handle)
}

/// Like [`scripted`], but the stream ends as soon as the transport drops its writer.
pub fn scripted_without_handle<F>(responder: F) -> (LineTransport, Arc<Mutex<Vec<String>>>)
where
    F: FnMut(&str) -> Vec<String> + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded();
    let written = Arc::new(Mutex::new(Vec::new()));
    let transport = LineTransport::from_stream(
        "mock",
        READ_TIMEOUT,
        ModemOutput { rx, buf: Vec::new() },
        ModemInput {
            tx: Some(tx),
            partial: Vec::new(),
            lines_left: None,
            responder: Box::new(responder),
            written: Arc::clone(&written),
        },
    );
    (transport, written)
}

/// Options with a short command delay so tests stay fast.
pub fn fast_options() -> ChannelOptions {
    ChannelOptions {
        command_delay: Duration::from_millis(5),
        reply_timeout: Duration::from_millis(500),
    }
}

/// A module that answers `ok` to everything.
pub fn always_ok(_line: &str) -> Vec<String> {
    vec!["ok".to_string()]
}

pub fn lostik<F>(responder: F) -> (LoStik, ModemHandle)
where
    F: FnMut(&str) -> Vec<String> + Send + 'static,
{
    let (transport, handle) = scripted(responder);
    let stick = LoStik::from_transport(transport, fast_options()).expect("reader thread");
    (stick, handle)
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
