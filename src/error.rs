//! Error types for the listener and connection handlers.

use std::io;
use std::net::SocketAddr;

use crate::config::TransportKind;

/// Failures that stop the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to resolve listen address '{addr}': {source}")]
    Resolve { addr: String, source: io::Error },

    #[error("listen address '{addr}' has no {transport} address")]
    NoAddress {
        addr: String,
        transport: TransportKind,
    },

    #[error("failed to create socket on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("fatal issue occurred while accepting request: {0}")]
    Accept(#[source] io::Error),
}

/// Failures local to one connection.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("failed to read from client: {0}")]
    Read(#[source] io::Error),

    #[error("failed to write response: {0}")]
    Write(#[source] io::Error),

    #[error("failed to close connection cleanly: {0}")]
    Close(#[source] io::Error),
}

impl HandlerError {
    /// Connection phase the failure happened in.
    pub fn phase(&self) -> &'static str {
        match self {
            HandlerError::Read(_) => "read",
            HandlerError::Write(_) => "write",
            HandlerError::Close(_) => "close",
        }
    }
}
