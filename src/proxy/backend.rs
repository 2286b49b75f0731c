//! Backend server registry
//!
//! This module holds the fixed set of backend servers the relay forwards to,
//! tracking which of them have been firewalled by loop detection.
//!
//! Membership never changes after startup. The `firewalled` flag is the only
//! field mutated under the registry lock, and only ever with write access.

use crate::config::BackendConfig;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

/// Index of a backend in registration order.
pub type BackendId = usize;

/// Runtime health counters for a backend.
///
/// Written by the relay collaborator, read by the smart load balancer.
/// Kept outside the registry lock since they are plain counters.
#[derive(Debug, Default)]
pub struct BackendStats {
    active_connections: AtomicU32,
    consecutive_failures: AtomicU32,
}

impl BackendStats {
    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // saturating: a stray close must not wrap to u32::MAX
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn mark_failed(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }
}

/// A backend server with its bound addresses
#[derive(Debug, Clone)]
pub struct BackendServer {
    /// Registration index
    pub id: BackendId,

    /// Optional name for logging
    pub name: Option<String>,

    /// Addresses the backend listens on
    pub addrs: Vec<Ipv4Addr>,

    /// Port the backend listens on
    pub port: u16,

    /// Set when a client tried to reach this backend through the relay
    pub firewalled: bool,

    /// Shared with every snapshot of this backend
    pub stats: Arc<BackendStats>,
}

impl BackendServer {
    pub fn new(id: BackendId, config: BackendConfig) -> Self {
        Self {
            id,
            name: config.name,
            addrs: config.addrs,
            port: config.port,
            firewalled: false,
            stats: Arc::new(BackendStats::default()),
        }
    }

    /// Name if configured, otherwise `#<id>`.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("#{}", self.id),
        }
    }

    /// True if `ip:port` is one of this backend's bound addresses.
    pub fn is_bound_to(&self, ip: Ipv4Addr, port: u16) -> bool {
        self.port == port && self.addrs.contains(&ip)
    }

    /// Address the relay dials, the first bound IP.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.addrs
            .first()
            .map(|ip| SocketAddr::V4(SocketAddrV4::new(*ip, self.port)))
    }
}

/// Registry of all backend servers
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: Arc<RwLock<Vec<BackendServer>>>,
}

impl BackendRegistry {
    /// Create a registry from configuration, ids follow list order
    pub fn new(configs: Vec<BackendConfig>) -> Self {
        let backends = configs
            .into_iter()
            .enumerate()
            .map(|(id, config)| BackendServer::new(id, config))
            .collect();

        Self {
            backends: Arc::new(RwLock::new(backends)),
        }
    }

    /// Copy of every backend, firewalled or not
    pub async fn iterate(&self) -> Vec<BackendServer> {
        self.backends.read().await.clone()
    }

    /// Non-firewalled backends in registration order
    pub async fn snapshot(&self) -> Vec<BackendServer> {
        self.backends
            .read()
            .await
            .iter()
            .filter(|b| !b.firewalled)
            .cloned()
            .collect()
    }

    /// Ids of backends bound to `ip:port`
    pub async fn bound_to(&self, ip: Ipv4Addr, port: u16) -> Vec<BackendId> {
        self.backends
            .read()
            .await
            .iter()
            .filter(|b| b.is_bound_to(ip, port))
            .map(|b| b.id)
            .collect()
    }

    /// Set a backend's firewalled flag.
    ///
    /// Returns true if the flag changed. Marking an already firewalled
    /// backend, or an unknown id, is a no-op.
    pub async fn mark_firewalled(&self, id: BackendId) -> bool {
        let mut backends = self.backends.write().await;

        match backends.get_mut(id) {
            Some(backend) if !backend.firewalled => {
                backend.firewalled = true;
                tracing::warn!(
                    backend = %backend.display_name(),
                    "Backend firewalled after loop detection"
                );
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.backends.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.backends.read().await.is_empty()
    }
}
