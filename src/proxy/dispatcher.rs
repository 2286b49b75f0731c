//! Per-connection dispatch
//!
//! Runs the address filter on an inbound connection, picks a backend and
//! hands both to the relay. The load balancer is created lazily by the
//! first connection and shared by all of them.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::Config;
use crate::error::DispatchError;
use crate::proxy::address::DestinationAddress;
use crate::proxy::backend::{BackendRegistry, BackendServer};
use crate::proxy::balancer::LoadBalancer;
use crate::proxy::filter::AddressFilter;

/// An accepted client connection.
///
/// Owns the stream, so dropping it closes the connection on every exit
/// path. `pending` holds bytes read past the destination header.
#[derive(Debug)]
pub struct Inbound<S> {
    pub stream: S,
    pub peer: SocketAddr,
    pub pending: Bytes,
}

impl<S> Inbound<S> {
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            pending: Bytes::new(),
        }
    }

    pub fn with_pending(mut self, pending: Bytes) -> Self {
        self.pending = pending;
        self
    }
}

impl<S> Drop for Inbound<S> {
    fn drop(&mut self) {
        tracing::trace!(peer = %self.peer, "Inbound connection released");
    }
}

/// Carries traffic between a client and the chosen backend.
pub trait Relay<S>: Send + Sync {
    fn relay(
        &self,
        inbound: Inbound<S>,
        dest: &DestinationAddress,
        backend: BackendServer,
    ) -> impl Future<Output = io::Result<()>> + Send;
}

/// Admission and backend dispatch for outbound connections
pub struct Dispatcher<R> {
    filter: AddressFilter,
    registry: BackendRegistry,
    load_balance: String,
    balancer: OnceCell<LoadBalancer>,
    /// Times the balancer was built, stays at most 1
    initializations: AtomicUsize,
    relay: R,
}

impl<R> Dispatcher<R> {
    /// `load_balance` is resolved on the first dispatch, not here.
    pub fn new(
        filter: AddressFilter,
        registry: BackendRegistry,
        load_balance: impl Into<String>,
        relay: R,
    ) -> Self {
        Self {
            filter,
            registry,
            load_balance: load_balance.into(),
            balancer: OnceCell::new(),
            initializations: AtomicUsize::new(0),
            relay,
        }
    }

    pub fn from_config(cfg: &Config, relay: R) -> Self {
        let registry = BackendRegistry::new(cfg.backends.clone());
        let filter = AddressFilter::from_config(&cfg.target, registry.clone());
        Self::new(filter, registry, cfg.load_balance.clone(), relay)
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    /// The shared load balancer, resolving the policy on first use.
    ///
    /// Concurrent first callers wait for a single initialization.
    pub async fn balancer(&self) -> &LoadBalancer {
        self.balancer
            .get_or_init(|| async {
                let members = self.registry.len().await;
                let balancer = LoadBalancer::from_name(&self.load_balance, members);
                self.initializations.fetch_add(1, Ordering::Relaxed);
                debug!(policy = ?balancer.policy(), members, "Load balancer initialized");
                balancer
            })
            .await
    }

    pub fn balancer_initializations(&self) -> usize {
        self.initializations.load(Ordering::Relaxed)
    }

    /// Filter, select and relay one outbound connection.
    ///
    /// On any error the inbound connection is dropped before returning.
    pub async fn handle_outbound<S>(
        &self,
        inbound: Inbound<S>,
        dest: &DestinationAddress,
    ) -> Result<(), DispatchError>
    where
        R: Relay<S>,
        S: Send,
    {
        self.filter.check(dest, inbound.peer).await.into_result()?;

        let candidates = self.registry.snapshot().await;
        let backend = self.balancer().await.select(&candidates)?;

        debug!(
            peer = %inbound.peer,
            target = %dest,
            backend = %backend.display_name(),
            "Dispatching to backend"
        );

        self.relay
            .relay(inbound, dest, backend)
            .await
            .map_err(DispatchError::Relay)
    }
}
