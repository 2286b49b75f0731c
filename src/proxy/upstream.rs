//! Upstream relay
//!
//! Connects to the chosen backend, forwards the destination header and any
//! client bytes read along with it, then copies data both ways until either
//! side closes.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::proxy::address::DestinationAddress;
use crate::proxy::backend::{BackendServer, BackendStats};
use crate::proxy::dispatcher::{Inbound, Relay};

/// Default backend connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Relays inbound connections to backends over TCP
#[derive(Debug, Clone)]
pub struct TcpRelay {
    connect_timeout: Duration,
}

impl Default for TcpRelay {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TcpRelay {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect(&self, backend: &BackendServer) -> io::Result<TcpStream> {
        let addr = backend.socket_addr().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "backend has no bound address")
        })?;

        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out", addr),
            )),
        }
    }
}

/// Keeps a backend's active connection count for the guard's lifetime
struct ActiveConnection<'a>(&'a BackendStats);

impl<'a> ActiveConnection<'a> {
    fn open(stats: &'a BackendStats) -> Self {
        stats.connection_opened();
        Self(stats)
    }
}

impl Drop for ActiveConnection<'_> {
    fn drop(&mut self) {
        self.0.connection_closed();
    }
}

impl<S> Relay<S> for TcpRelay
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn relay(
        &self,
        mut inbound: Inbound<S>,
        dest: &DestinationAddress,
        backend: BackendServer,
    ) -> io::Result<()> {
        let mut upstream = match self.connect(&backend).await {
            Ok(stream) => {
                backend.stats.mark_success();
                stream
            }
            Err(e) => {
                backend.stats.mark_failed();
                tracing::warn!(
                    backend = %backend.display_name(),
                    failures = backend.stats.consecutive_failures(),
                    error = %e,
                    "Failed to connect to backend"
                );
                return Err(e);
            }
        };

        let _active = ActiveConnection::open(&backend.stats);

        let header = dest
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        upstream.write_all(&header).await?;
        if !inbound.pending.is_empty() {
            upstream.write_all(&inbound.pending).await?;
        }
        upstream.flush().await?;

        let (sent, received) =
            tokio::io::copy_bidirectional(&mut inbound.stream, &mut upstream).await?;

        tracing::debug!(
            peer = %inbound.peer,
            target = %dest,
            backend = %backend.display_name(),
            sent,
            received,
            "Relay finished"
        );

        Ok(())
    }
}
