use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::info;

use crate::config::Config;
use crate::error::AddressError;
use crate::proxy::address::DestinationAddress;
use crate::proxy::dispatcher::{Dispatcher, Inbound, Relay};
use crate::proxy::upstream::TcpRelay;

/// Destination headers never exceed this (domain kind, 255 byte name)
const MAX_HEADER_LEN: usize = 1 + 1 + 255 + 2;

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen_addr))?;
    info!("Listening on {}", cfg.listen_addr);

    let dispatcher = Arc::new(Dispatcher::from_config(
        cfg,
        TcpRelay::new(cfg.connect_timeout()),
    ));
    if dispatcher.registry().is_empty().await {
        tracing::warn!("No backend servers configured, every connection will fail");
    }
    info!(
        backends = dispatcher.registry().len().await,
        load_balance = %cfg.load_balance,
        "Dispatcher ready"
    );

    serve(listener, dispatcher, cfg.handshake_timeout()).await
}

/// Accept loop, one task per connection
pub async fn serve<R>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher<R>>,
    handshake_timeout: Duration,
) -> anyhow::Result<()>
where
    R: Relay<TcpStream> + 'static,
{
    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Accepted connection from {}", peer);

        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let mut socket = socket;
            let mut buffer = BytesMut::with_capacity(MAX_HEADER_LEN);

            let dest =
                match timeout(handshake_timeout, read_destination(&mut socket, &mut buffer)).await {
                    Ok(Ok(Some(dest))) => dest,
                    Ok(Ok(None)) => {
                        tracing::debug!("Connection from {} closed before header", peer);
                        return;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("Bad destination header from {}: {}", peer, e);
                        return;
                    }
                    Err(_) => {
                        tracing::warn!("Timed out reading destination header from {}", peer);
                        return;
                    }
                };

            let inbound = Inbound::new(socket, peer).with_pending(buffer.freeze());
            if let Err(e) = dispatcher.handle_outbound(inbound, &dest).await {
                if e.is_selection() {
                    tracing::error!("Dispatch error from {} to {}: {}", peer, dest, e);
                } else {
                    tracing::debug!("Connection from {} to {} ended: {}", peer, dest, e);
                }
            }
        });
    }
}

/// Read and decode a destination header.
///
/// Bytes past the header stay in `buffer`. Returns `None` if the client
/// closes before sending a full header.
pub async fn read_destination<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
) -> anyhow::Result<Option<DestinationAddress>>
where
    S: AsyncRead + Unpin,
{
    loop {
        match DestinationAddress::decode(buffer) {
            Ok((dest, consumed)) => {
                buffer.advance(consumed);
                return Ok(Some(dest));
            }

            Err(AddressError::Incomplete) => {
                // need more data
            }

            Err(e) => {
                return Err(anyhow::anyhow!("destination header error: {}", e));
            }
        }

        let n = stream.read_buf(buffer).await?;

        if n == 0 {
            return Ok(None);
        }
    }
}
