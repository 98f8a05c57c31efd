//! Line framing over a duplex byte stream.
//!
//! The module speaks ASCII lines terminated by `\r\n` in both directions. The
//! [`LineTransport`] owns the stream: writes are serialized through one lock so
//! two commands never interleave on the wire, while a single reader context pulls
//! lines concurrently. Closing is idempotent and happens at the latest on drop.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::command::Command;
use crate::config::SerialConfig;
use crate::error::{Error, Result};

/// Line terminator used in both directions.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Longest line kept, terminator included. `radio_rx` with a 255 byte
/// payload is about 520 characters.
pub const MAX_LINE_LEN: usize = 1024;

/// One received line, terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line(String);

impl Line {
    /// Decode raw bytes of one line, stripping a trailing `\r\n` (or bare `\n`).
    pub fn from_wire(bytes: &[u8]) -> Line {
        let mut end = bytes.len();
        if end > 0 && bytes[end - 1] == b'\n' {
            end -= 1;
        }
        if end > 0 && bytes[end - 1] == b'\r' {
            end -= 1;
        }
        Line(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a single [`LineTransport::read_line`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// A complete line arrived.
    Line(Line),
    /// Nothing complete within the read timeout; partial data is kept.
    Timeout,
    /// The first [`MAX_LINE_LEN`] bytes of a line that never ended in time.
    /// The rest of that line is dropped.
    Overlong(Line),
    /// The stream ended or the transport was closed.
    Closed,
}

struct ReadHalf {
    inner: BufReader<Box<dyn Read + Send>>,
    pending: Vec<u8>,
    // inside an overlong line, dropping bytes up to its terminator
    skipping: bool,
}

/// Exclusive owner of the byte stream to one module.
pub struct LineTransport {
    address: String,
    read_timeout: Duration,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    reader: Mutex<Option<ReadHalf>>,
    closed: AtomicBool,
}

impl LineTransport {
    /// Open the serial device described by `config`.
    pub fn open(config: &SerialConfig) -> Result<LineTransport> {
        let port = serialport::new(config.address.as_str(), config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.read_timeout)
            .open()
            .map_err(|source| Error::Connect {
                address: config.address.clone(),
                source,
            })?;
        let read_port = port.try_clone().map_err(|source| Error::Connect {
            address: config.address.clone(),
            source,
        })?;
        debug!(
            "opened {} at {} baud, read timeout {:?}",
            config.address, config.baud_rate, config.read_timeout
        );
        Ok(Self::from_stream(
            &config.address,
            config.read_timeout,
            read_port,
            port,
        ))
    }

    /// Wrap an already open duplex stream.
    ///
    /// The read half must return `io::ErrorKind::TimedOut` (or `WouldBlock`)
    /// once `read_timeout` passes without data, the way a serial port does, and
    /// `Ok(0)` when the stream has ended.
    pub fn from_stream<R, W>(address: &str, read_timeout: Duration, reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let reader: Box<dyn Read + Send> = Box::new(reader);
        let writer: Box<dyn Write + Send> = Box::new(writer);
        LineTransport {
            address: address.to_string(),
            read_timeout,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(ReadHalf {
                inner: BufReader::new(reader),
                pending: Vec::new(),
                skipping: false,
            })),
            closed: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write one command line, terminator appended, as a single write.
    pub fn write_line(&self, command: &Command) -> Result<()> {
        let buf = command.encode();
        let mut guard = self.writer.lock();
        let writer = match guard.as_mut() {
            Some(w) if !self.is_closed() => w,
            _ => return Err(Error::Closed),
        };
        debug!(">> {}", command);
        writer
            .write_all(&buf)
            .and_then(|_| writer.flush())
            .map_err(Error::Write)
    }

    /// Read until a terminator, a timeout or the end of the stream.
    pub fn read_line(&self) -> Result<ReadEvent> {
        if self.is_closed() {
            return Ok(ReadEvent::Closed);
        }
        let mut guard = self.reader.lock();
        let half = match guard.as_mut() {
            Some(h) => h,
            None => return Ok(ReadEvent::Closed),
        };

        loop {
            if self.is_closed() {
                *guard = None;
                return Ok(ReadEvent::Closed);
            }
            let limit = (MAX_LINE_LEN - half.pending.len()) as u64;
            match (&mut half.inner)
                .take(limit)
                .read_until(b'\n', &mut half.pending)
            {
                Ok(0) => {
                    trace!("stream {} ended", self.address);
                    *guard = None;
                    return Ok(ReadEvent::Closed);
                }
                Ok(_) if half.pending.ends_with(b"\n") => {
                    if half.skipping {
                        half.skipping = false;
                        half.pending.clear();
                        continue;
                    }
                    let line = Line::from_wire(&half.pending);
                    half.pending.clear();
                    debug!("<< {}", line);
                    return Ok(ReadEvent::Line(line));
                }
                Ok(_) if half.pending.len() >= MAX_LINE_LEN => {
                    if half.skipping {
                        half.pending.clear();
                        continue;
                    }
                    let line = Line::from_wire(&half.pending);
                    half.pending.clear();
                    half.skipping = true;
                    warn!("dropping line longer than {} bytes", MAX_LINE_LEN);
                    return Ok(ReadEvent::Overlong(line));
                }
                // EOF in the middle of a line; the partial line is kept for the next call
                Ok(_) => return Ok(ReadEvent::Timeout),
                Err(ref e) if is_timeout(e) => {
                    if self.is_closed() {
                        *guard = None;
                        return Ok(ReadEvent::Closed);
                    }
                    return Ok(ReadEvent::Timeout);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    return Ok(ReadEvent::Timeout)
                }
                Err(e) => return Err(Error::Read(e)),
            }
        }
    }

    /// Release the stream. Safe to call more than once.
    ///
    /// The write half is dropped immediately; a reader blocked in
    /// [`read_line`](Self::read_line) sees `Closed` after its current timeout.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing {}", self.address);
        self.writer.lock().take();
        // only possible when no reader is blocked right now
        if let Some(mut guard) = self.reader.try_lock() {
            guard.take();
        }
    }
}

impl Drop for LineTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn transport(input: &[u8]) -> (LineTransport, SharedBuf) {
        let out = SharedBuf::default();
        let t = LineTransport::from_stream(
            "test",
            Duration::from_millis(10),
            Cursor::new(input.to_vec()),
            out.clone(),
        );
        (t, out)
    }

    #[test]
    fn test_from_wire_strips_terminator() {
        assert_eq!(Line::from_wire(b"ok\r\n").as_str(), "ok");
        assert_eq!(Line::from_wire(b"ok\n").as_str(), "ok");
        assert_eq!(Line::from_wire(b"ok").as_str(), "ok");
    }

    #[test]
    fn test_read_lines_then_closed() {
        let (t, _) = transport(b"RN2483 1.0.3\r\nok\r\n");
        assert_eq!(
            t.read_line().unwrap(),
            ReadEvent::Line(Line("RN2483 1.0.3".to_string()))
        );
        assert_eq!(t.read_line().unwrap(), ReadEvent::Line(Line("ok".to_string())));
        assert_eq!(t.read_line().unwrap(), ReadEvent::Closed);
        assert_eq!(t.read_line().unwrap(), ReadEvent::Closed);
    }

    #[test]
    fn test_write_line_appends_terminator() {
        let (t, out) = transport(b"");
        t.write_line(&Command::GetVersion).unwrap();
        t.write_line(&Command::Pause).unwrap();
        assert_eq!(&*out.0.lock(), b"sys get ver\r\nmac pause\r\n");
    }

    #[test]
    fn test_overlong_line_is_cut_and_rest_dropped() {
        let mut input = vec![b'A'; 3000];
        input.extend_from_slice(b"\r\nok\r\n");
        let (t, _) = transport(&input);
        match t.read_line().unwrap() {
            ReadEvent::Overlong(line) => assert_eq!(line.as_str().len(), MAX_LINE_LEN),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(t.read_line().unwrap(), ReadEvent::Line(Line("ok".to_string())));
        assert_eq!(t.read_line().unwrap(), ReadEvent::Closed);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (t, _) = transport(b"ok\r\n");
        t.close();
        t.close();
        assert!(t.is_closed());
        assert_eq!(t.read_line().unwrap(), ReadEvent::Closed);
        assert!(matches!(t.write_line(&Command::GetVersion), Err(Error::Closed)));
    }
}
