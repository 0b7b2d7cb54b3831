//! Per-connection request loop.
//!
//! Each accepted stream is owned by one `Connection` for its whole life.
//! The connection cycles through `Reading → Transforming → Writing` once
//! per framed message and ends in `Closed` on peer close, an I/O failure,
//! or a client that overflows the drain budget.
//!
//! Nothing here returns an error to a caller. Failures are pushed to the
//! `Reporter` and the connection is shut down.

use bytes::{BufMut, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::HandlerError;
use crate::framer::{Frame, Framer};
use crate::reporter::{Diagnostic, Event, Reporter};

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the next frame.
    Reading,
    /// Applying the transform to a framed message.
    Transforming,
    /// Writing the response back.
    Writing,
    /// Shut down; no further I/O.
    Closed,
}

/// Counters reported when a connection ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Messages transformed and answered.
    pub messages: u64,
    /// Oversized messages, drained or not.
    pub oversized: u64,
}

/// A single client connection.
pub struct Connection<S> {
    framer: Framer<ReadHalf<S>>,
    writer: WriteHalf<S>,
    peer: SocketAddr,
    config: Arc<Config>,
    reporter: Reporter,
    state: ConnState,
    stats: ConnectionStats,
    /// Reused for every response line.
    response: BytesMut,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new connection in initial reading state.
    pub fn new(stream: S, peer: SocketAddr, config: Arc<Config>, reporter: Reporter) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            framer: Framer::new(reader, config.byte_limit, config.max_drain),
            writer,
            peer,
            response: BytesMut::with_capacity(config.byte_limit + 1),
            config,
            reporter,
            state: ConnState::Reading,
            stats: ConnectionStats::default(),
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Serve the connection until it ends, then close it.
    pub async fn run(mut self) -> ConnectionStats {
        if let Err(e) = self.serve().await {
            self.report(Event::Failed(e)).await;
        }
        self.close().await;

        debug!(
            peer = %self.peer,
            messages = self.stats.messages,
            oversized = self.stats.oversized,
            "Connection closed"
        );
        self.stats
    }

    async fn serve(&mut self) -> Result<(), HandlerError> {
        loop {
            self.transition(ConnState::Reading);

            let frame = self.framer.next_frame().await.map_err(HandlerError::Read)?;
            match frame {
                Frame::Line(message) => {
                    // `message` still borrows the framer; touch only the state field
                    advance(&mut self.state, self.peer, ConnState::Transforming);
                    let transformed = self.config.transform.apply(message);
                    debug!(
                        peer = %self.peer,
                        message = %String::from_utf8_lossy(message),
                        transformed = %String::from_utf8_lossy(&transformed),
                        "Transformed message"
                    );

                    self.transition(ConnState::Writing);
                    self.response.clear();
                    self.response.extend_from_slice(&transformed);
                    self.response.put_u8(b'\n');
                    self.writer
                        .write_all(&self.response)
                        .await
                        .map_err(HandlerError::Write)?;
                    self.stats.messages += 1;
                }
                Frame::Overflow => {
                    self.stats.oversized += 1;
                    let limit = self.config.byte_limit;
                    self.report(Event::Oversize { limit }).await;
                    self.notify(&oversize_notice(limit)).await;
                }
                Frame::DrainExhausted => {
                    self.stats.oversized += 1;
                    let limit = self.config.byte_limit;
                    self.report(Event::DrainExhausted {
                        limit,
                        max_drain: self.config.max_drain,
                    })
                    .await;
                    self.notify(&disconnect_notice(limit)).await;
                    return Ok(());
                }
                Frame::Closed => {
                    trace!(peer = %self.peer, "Connection closed by client");
                    return Ok(());
                }
            }
        }
    }

    /// Best-effort write of a plain-text notice.
    async fn notify(&mut self, notice: &str) {
        self.transition(ConnState::Writing);
        if let Err(e) = self.writer.write_all(notice.as_bytes()).await {
            debug!(peer = %self.peer, error = %e, "Failed to send notice to client");
        }
    }

    /// Shut down the write side once. The socket closes when `self` drops.
    async fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.transition(ConnState::Closed);
        if let Err(e) = self.writer.shutdown().await {
            if e.kind() != io::ErrorKind::NotConnected {
                self.report(Event::Failed(HandlerError::Close(e))).await;
            }
        }
    }

    async fn report(&self, event: Event) {
        self.reporter.report(Diagnostic::new(self.peer, event)).await;
    }

    fn transition(&mut self, next: ConnState) {
        advance(&mut self.state, self.peer, next);
    }
}

fn advance(state: &mut ConnState, peer: SocketAddr, next: ConnState) {
    if *state != next {
        trace!(peer = %peer, from = ?*state, to = ?next, "Connection state");
        *state = next;
    }
}

/// Sent after an oversized message was discarded.
pub fn oversize_notice(limit: usize) -> String {
    format!("bad request: message exceeded server's byte limit (limit: {limit} bytes)\n")
}

/// Sent before disconnecting a client whose message never ended.
pub fn disconnect_notice(limit: usize) -> String {
    format!(
        "bad request: message exceeded server's byte limit (limit: {limit} bytes), disconnecting\n"
    )
}
