//! Diagnostic sink shared by every connection handler.
//!
//! Handlers push `Diagnostic`s into a bounded channel; a single consumer
//! task drains it and writes each event to the log. The channel is
//! best-effort: a full queue makes producers wait, and events sent after
//! the consumer has gone away are dropped. The consumer never sends
//! anything back, so it cannot deadlock against the handlers it serves.

use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::HandlerError;

/// What happened on a connection.
#[derive(Debug)]
pub enum Event {
    /// An oversized message was drained; the connection continues.
    Oversize { limit: usize },
    /// An oversized message never ended within the drain budget.
    DrainExhausted { limit: usize, max_drain: usize },
    /// An I/O failure ended (or happened while ending) the connection.
    Failed(HandlerError),
}

/// A diagnostic event and the connection it came from.
#[derive(Debug)]
pub struct Diagnostic {
    pub peer: SocketAddr,
    pub event: Event,
}

impl Diagnostic {
    pub fn new(peer: SocketAddr, event: Event) -> Self {
        Self { peer, event }
    }

    /// Log this event at a severity chosen by its kind.
    pub fn log(&self) {
        match &self.event {
            Event::Oversize { limit } => {
                info!(
                    peer = %self.peer,
                    limit,
                    "Got bad request from client: message exceeded byte limit"
                );
            }
            Event::DrainExhausted { limit, max_drain } => {
                warn!(
                    peer = %self.peer,
                    limit,
                    max_drain,
                    "Message exceeded byte limit and never ended, disconnecting client"
                );
            }
            Event::Failed(e) => {
                error!(
                    peer = %self.peer,
                    phase = e.phase(),
                    error = %e,
                    "Encountered issue with client request"
                );
            }
        }
    }
}

/// Producer handle. Cheap to clone; one per connection handler.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: mpsc::Sender<Diagnostic>,
}

impl Reporter {
    /// Create a reporter and the receiving end of its queue.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn channel(capacity: usize) -> (Reporter, mpsc::Receiver<Diagnostic>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Reporter { tx }, rx)
    }

    /// Create a reporter whose events are logged by a background task.
    ///
    /// The task ends once every `Reporter` clone has been dropped.
    pub fn spawn(capacity: usize) -> (Reporter, JoinHandle<()>) {
        let (reporter, rx) = Self::channel(capacity);
        let handle = tokio::spawn(consume(rx));
        (reporter, handle)
    }

    /// Queue a diagnostic, waiting for space if the queue is full.
    pub async fn report(&self, diagnostic: Diagnostic) {
        if let Err(mpsc::error::SendError(diagnostic)) = self.tx.send(diagnostic).await {
            debug!(?diagnostic, "Reporter stopped, dropping diagnostic");
        }
    }
}

async fn consume(mut rx: mpsc::Receiver<Diagnostic>) {
    while let Some(diagnostic) = rx.recv().await {
        diagnostic.log();
    }
    debug!("Reporter stopped");
}
