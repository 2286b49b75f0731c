//! Tests for the backend registry

use relaygate::config::BackendConfig;
use relaygate::proxy::backend::{BackendRegistry, BackendServer};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Barrier;

fn backend(name: &str, addrs: &[[u8; 4]], port: u16) -> BackendConfig {
    BackendConfig {
        name: Some(name.to_string()),
        addrs: addrs.iter().map(|o| Ipv4Addr::from(*o)).collect(),
        port,
    }
}

fn three_backends() -> Vec<BackendConfig> {
    vec![
        backend("backend-1", &[[10, 0, 0, 5]], 8388),
        backend("backend-2", &[[10, 0, 0, 6], [10, 0, 1, 6]], 8388),
        backend("backend-3", &[[10, 0, 0, 7]], 9000),
    ]
}

#[test]
fn test_backend_creation() {
    let server = BackendServer::new(0, backend("backend-1", &[[10, 0, 0, 5]], 8388));

    assert_eq!(server.id, 0);
    assert_eq!(server.display_name(), "backend-1");
    assert!(!server.firewalled);
    assert_eq!(server.socket_addr().unwrap().to_string(), "10.0.0.5:8388");
}

#[test]
fn test_backend_display_name_without_name() {
    let config = BackendConfig {
        name: None,
        addrs: vec![Ipv4Addr::new(10, 0, 0, 5)],
        port: 8388,
    };

    let server = BackendServer::new(3, config);
    assert_eq!(server.display_name(), "#3");
}

#[test]
fn test_backend_without_addrs_has_no_socket_addr() {
    let config = BackendConfig {
        name: None,
        addrs: vec![],
        port: 8388,
    };

    assert!(BackendServer::new(0, config).socket_addr().is_none());
}

#[test]
fn test_backend_bound_to_any_of_its_addrs() {
    let server = BackendServer::new(0, backend("b", &[[10, 0, 0, 6], [10, 0, 1, 6]], 8388));

    assert!(server.is_bound_to(Ipv4Addr::new(10, 0, 0, 6), 8388));
    assert!(server.is_bound_to(Ipv4Addr::new(10, 0, 1, 6), 8388));
    assert!(!server.is_bound_to(Ipv4Addr::new(10, 0, 1, 6), 8389));
    assert!(!server.is_bound_to(Ipv4Addr::new(10, 0, 2, 6), 8388));
}

#[test]
fn test_backend_stats_tracking() {
    let server = BackendServer::new(0, backend("b", &[[10, 0, 0, 5]], 8388));
    let stats = &server.stats;

    stats.mark_failed();
    stats.mark_failed();
    assert_eq!(stats.consecutive_failures(), 2);

    stats.mark_success();
    assert_eq!(stats.consecutive_failures(), 0);

    stats.connection_opened();
    stats.connection_opened();
    stats.connection_closed();
    assert_eq!(stats.active_connections(), 1);

    stats.connection_closed();
    stats.connection_closed();
    assert_eq!(stats.active_connections(), 0);
}

#[test]
fn test_backend_stats_shared_between_clones() {
    let server = BackendServer::new(0, backend("b", &[[10, 0, 0, 5]], 8388));
    let copy = server.clone();

    copy.stats.connection_opened();

    assert!(Arc::ptr_eq(&server.stats, &copy.stats));
    assert_eq!(server.stats.active_connections(), 1);
}

#[tokio::test]
async fn test_registry_creation() {
    let registry = BackendRegistry::new(three_backends());

    assert_eq!(registry.len().await, 3);
    assert!(!registry.is_empty().await);
    assert_eq!(registry.snapshot().await.len(), 3);

    let ids: Vec<_> = registry.iterate().await.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_registry_mark_firewalled_is_idempotent() {
    let registry = BackendRegistry::new(three_backends());

    assert!(registry.mark_firewalled(1).await);
    assert!(!registry.mark_firewalled(1).await);

    let backends = registry.iterate().await;
    assert!(!backends[0].firewalled);
    assert!(backends[1].firewalled);
    assert!(!backends[2].firewalled);
    assert_eq!(registry.snapshot().await.len(), 2);
}

#[tokio::test]
async fn test_registry_mark_unknown_id_is_noop() {
    let registry = BackendRegistry::new(three_backends());

    assert!(!registry.mark_firewalled(42).await);
    assert_eq!(registry.snapshot().await.len(), 3);
}

#[tokio::test]
async fn test_registry_snapshot_skips_firewalled() {
    let registry = BackendRegistry::new(three_backends());
    registry.mark_firewalled(0).await;

    let names: Vec<_> = registry
        .snapshot()
        .await
        .iter()
        .map(|b| b.display_name())
        .collect();

    assert_eq!(names, vec!["backend-2", "backend-3"]);
    // iterate still sees every backend
    assert_eq!(registry.iterate().await.len(), 3);
}

#[tokio::test]
async fn test_registry_bound_to() {
    let registry = BackendRegistry::new(three_backends());

    assert_eq!(registry.bound_to(Ipv4Addr::new(10, 0, 1, 6), 8388).await, vec![1]);
    assert_eq!(registry.bound_to(Ipv4Addr::new(10, 0, 0, 7), 9000).await, vec![2]);
    assert!(registry.bound_to(Ipv4Addr::new(10, 0, 0, 7), 8388).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_registry_concurrent_marking() {
    let registry = BackendRegistry::new(three_backends());
    let barrier = Arc::new(Barrier::new(16));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = registry.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            // readers racing the writers
            let _ = registry.snapshot().await;
            registry.mark_firewalled(2).await
        }));
    }

    let mut changed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            changed += 1;
        }
    }

    // exactly one writer flips the flag
    assert_eq!(changed, 1);
    assert!(registry.iterate().await[2].firewalled);
}
