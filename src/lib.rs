//! shiftline: a line-delimited TCP transform server
//!
//! Clients send newline-terminated messages; the server answers each one
//! with the message shifted by one byte value (or shifted back, in decode
//! mode), followed by a newline.
//!
//! Features:
//! - One task per connection, responses in request order
//! - Fixed per-connection read buffer with bounded draining of oversized
//!   messages
//! - A single background reporter for per-connection diagnostics
//! - Configuration via CLI arguments or TOML file

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod framer;
pub mod reporter;
pub mod server;
pub mod transform;

pub use client::{Client, ClientError};
pub use config::{Config, ConfigError, TransportKind};
pub use connection::{ConnState, Connection, ConnectionStats};
pub use error::{HandlerError, ServerError};
pub use framer::{Frame, Framer};
pub use reporter::{Diagnostic, Event, Reporter};
pub use server::Server;
pub use transform::Transform;
