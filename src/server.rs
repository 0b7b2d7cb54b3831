//! TCP listener for the line-transform service.
//!
//! Accepts connections and hands each one to its own task running a
//! `Connection`. Accept errors that only reflect a transient condition
//! (a peer that gave up, a full file table) are logged and the loop keeps
//! going; anything else stops the listener.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::{Config, TransportKind};
use crate::connection::Connection;
use crate::error::ServerError;
use crate::reporter::Reporter;

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Pause before accepting again after running out of descriptors or memory
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server instance
pub struct Server {
    config: Arc<Config>,
    listener: TcpListener,
    reporter: Reporter,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the configured address.
    pub async fn bind(config: Arc<Config>, reporter: Reporter) -> Result<Self, ServerError> {
        let addr = resolve(&config).await?;
        let listener =
            create_listener(addr, config.transport).map_err(|source| ServerError::Bind {
                addr,
                source,
            })?;

        info!(
            address = %listener.local_addr().unwrap_or(addr),
            transport = %config.transport,
            transform = %config.transform,
            byte_limit = config.byte_limit,
            max_drain = config.max_drain,
            "Server listening"
        );

        Ok(Server {
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            config,
            listener,
            reporter,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a fatal accept error.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes or a fatal accept error.
    ///
    /// The listener is closed on return. After a shutdown, open connections
    /// get up to `shutdown_grace` to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Server {
            config,
            listener,
            reporter,
            connection_limit,
        } = self;
        tokio::pin!(shutdown);

        let result = loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                permit = Arc::clone(&connection_limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
            };

            let accepted = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");

                    let config = Arc::clone(&config);
                    let reporter = reporter.clone();

                    tokio::spawn(async move {
                        Connection::new(stream, peer, config, reporter).run().await;
                        drop(permit);
                    });
                }
                Err(e) if is_transient_accept_error(&e) => {
                    warn!(error = %e, "Non-fatal issue occurred during connection accept");
                    if is_resource_exhaustion(&e) {
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
                Err(e) => break Err(ServerError::Accept(e)),
            }
        };

        let local = listener.local_addr().ok();
        drop(listener);
        info!(address = ?local, "Listener closed");

        if result.is_ok() {
            wait_for_connections(&connection_limit, &config).await;
        }

        result
    }
}

/// Wait for in-flight connections by reclaiming every permit.
async fn wait_for_connections(connection_limit: &Semaphore, config: &Config) {
    let open = config
        .max_connections
        .saturating_sub(connection_limit.available_permits());
    if open == 0 {
        return;
    }

    info!(open, grace = ?config.shutdown_grace, "Waiting for open connections");
    let all = u32::try_from(config.max_connections).unwrap_or(u32::MAX);
    match tokio::time::timeout(config.shutdown_grace, connection_limit.acquire_many(all)).await {
        Ok(_) => info!("All connections closed"),
        Err(_) => warn!(
            open = config
                .max_connections
                .saturating_sub(connection_limit.available_permits()),
            "Shutdown grace period elapsed with connections still open"
        ),
    }
}

/// Resolve the listen address to the first address of the configured family.
async fn resolve(config: &Config) -> Result<SocketAddr, ServerError> {
    let addr = config.listen_addr();
    let found = tokio::net::lookup_host(addr.clone())
        .await
        .map_err(|source| ServerError::Resolve {
            addr: addr.clone(),
            source,
        })?
        .find(|candidate| config.transport.accepts(candidate));

    found.ok_or(ServerError::NoAddress {
        addr,
        transport: config.transport,
    })
}

/// Create a non-blocking listening socket.
fn create_listener(addr: SocketAddr, transport: TransportKind) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    if addr.is_ipv6() {
        socket.set_only_v6(transport == TransportKind::Tcp6)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    TcpListener::from_std(socket.into())
}

/// Whether an accept error leaves the listener usable.
pub fn is_transient_accept_error(e: &io::Error) -> bool {
    use io::ErrorKind::*;

    if matches!(
        e.kind(),
        ConnectionAborted
            | ConnectionReset
            | ConnectionRefused
            | Interrupted
            | WouldBlock
            | TimedOut
    ) {
        return true;
    }

    is_resource_exhaustion(e) || matches!(e.raw_os_error(), Some(libc::EPROTO | libc::EPERM))
}

/// Out of descriptors or kernel memory. Retrying immediately would spin.
fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}
