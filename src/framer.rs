//! Newline framing over a fixed-size read buffer.
//!
//! A `Framer` never holds more than `byte_limit + 1` bytes of a client's
//! input. When a message does not fit, the rest of it is drained by
//! refilling the same buffer until its delimiter shows up, so the next
//! frame starts on a message boundary. The number of refills is capped
//! by `max_drain`; a client that never sends a delimiter is cut off
//! instead of pinning the connection open.
//!
//! ```text
//!   next_frame()
//!       │
//!       ├─ '\n' within buffer ─────────────► Line(body)
//!       ├─ end of input ───────────────────► Closed
//!       └─ buffer full, no '\n'
//!              │  (discard, refill up to max_drain times)
//!              ├─ '\n' found ─────────────► Overflow
//!              ├─ end of input ───────────► Closed
//!              └─ every refill full ──────► DrainExhausted
//! ```

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Outcome of a single `Framer::next_frame` call.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    /// A complete message body, delimiter stripped.
    Line(&'a [u8]),
    /// A message exceeded the byte limit and has been discarded.
    /// Framing is aligned on the next message.
    Overflow,
    /// A message exceeded the byte limit and no delimiter arrived
    /// within the drain budget.
    DrainExhausted,
    /// The peer closed its side of the stream.
    Closed,
}

/// Reads newline-terminated messages from `R` into a bounded buffer.
pub struct Framer<R> {
    reader: R,
    buf: Box<[u8]>,
    /// Start of unconsumed bytes.
    start: usize,
    /// End of filled bytes.
    end: usize,
    max_drain: usize,
}

impl<R: AsyncRead + Unpin> Framer<R> {
    /// Create a framer accepting messages of up to `byte_limit` bytes.
    ///
    /// The buffer holds one extra byte for the delimiter.
    pub fn new(reader: R, byte_limit: usize, max_drain: usize) -> Self {
        Self {
            reader,
            buf: vec![0u8; byte_limit + 1].into_boxed_slice(),
            start: 0,
            end: 0,
            max_drain,
        }
    }

    /// Largest message body that frames as a `Line`.
    pub fn byte_limit(&self) -> usize {
        self.buf.len() - 1
    }

    /// Bytes read from the stream but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.end - self.start
    }

    /// Read the next frame.
    ///
    /// A trailing partial message at end of input is dropped and reported
    /// as `Closed`.
    pub async fn next_frame(&mut self) -> io::Result<Frame<'_>> {
        loop {
            if let Some(pos) = find_newline(&self.buf[self.start..self.end]) {
                let line_start = self.start;
                let line_end = self.start + pos;
                self.start = line_end + 1;
                return Ok(Frame::Line(strip_cr(&self.buf[line_start..line_end])));
            }

            if self.buffered() == self.buf.len() {
                self.clear();
                return self.drain().await;
            }

            if self.fill().await? == 0 {
                if self.buffered() > 0 {
                    trace!(bytes = self.buffered(), "Discarding undelimited tail");
                }
                self.clear();
                return Ok(Frame::Closed);
            }
        }
    }

    /// Discard the remainder of an oversized message.
    ///
    /// Called with an empty buffer. Each attempt refills the buffer until
    /// it finds a delimiter or fills up again.
    async fn drain(&mut self) -> io::Result<Frame<'static>> {
        for attempt in 1..=self.max_drain {
            loop {
                let scanned = self.end;
                if self.fill().await? == 0 {
                    self.clear();
                    return Ok(Frame::Closed);
                }

                if let Some(pos) = find_newline(&self.buf[scanned..self.end]) {
                    // Keep whatever follows the delimiter; it is the next message.
                    self.start = scanned + pos + 1;
                    trace!(attempt, "Drained oversized message");
                    return Ok(Frame::Overflow);
                }

                if self.end == self.buf.len() {
                    self.clear();
                    break;
                }
            }
            trace!(attempt, max_drain = self.max_drain, "Drain attempt overflowed");
        }

        Ok(Frame::DrainExhausted)
    }

    /// Read more bytes into the free tail of the buffer.
    ///
    /// Must not be called with a full buffer. Returns 0 at end of input.
    async fn fill(&mut self) -> io::Result<usize> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }

        let n = self.reader.read(&mut self.buf[self.end..]).await?;
        self.end += n;
        Ok(n)
    }

    fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}

fn find_newline(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|&b| b == b'\n')
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}
