//! Backend load balancing
//!
//! A policy is resolved once from the `load_balance` setting and then used
//! for every connection. All policies see the same candidate view:
//! firewalled backends are dropped before the policy runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::error;

use crate::error::SelectError;
use crate::proxy::backend::BackendServer;

/// Prefix of the fixed index directive, e.g. `index:2`
const INDEX_PREFIX: &str = "index:";

/// How a backend is picked for each connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancePolicy {
    /// Fewest failures, then fewest active connections, then first registered
    Smart,
    /// Cycle through candidates in registration order
    RoundRobin,
    /// Always the candidate at this position
    FixedIndex(usize),
}

impl LoadBalancePolicy {
    /// Resolve a configured policy name.
    ///
    /// Unknown names are tried as an `index:<N>` directive. Anything that
    /// still does not parse is logged and falls back to `Smart`.
    pub fn resolve(name: &str) -> Self {
        match name {
            "smart" => LoadBalancePolicy::Smart,
            "roundrobin" => LoadBalancePolicy::RoundRobin,
            "none" => LoadBalancePolicy::FixedIndex(0),
            other => match Self::parse_index(other) {
                Some(index) => LoadBalancePolicy::FixedIndex(index),
                None => {
                    error!(
                        load_balance = other,
                        "wrong index specified load balance method format, use smart method now"
                    );
                    LoadBalancePolicy::Smart
                }
            },
        }
    }

    fn parse_index(name: &str) -> Option<usize> {
        name.strip_prefix(INDEX_PREFIX)?.trim().parse().ok()
    }
}

/// Selects a backend from a candidate snapshot
#[derive(Debug)]
pub struct LoadBalancer {
    policy: LoadBalancePolicy,
    /// Registered backend count, fixed for the process lifetime
    members: usize,
    cursor: AtomicUsize,
    /// Set once a fixed index turned out to exceed the registry
    degraded: AtomicBool,
}

impl LoadBalancer {
    pub fn new(policy: LoadBalancePolicy, members: usize) -> Self {
        Self {
            policy,
            members,
            cursor: AtomicUsize::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn from_name(name: &str, members: usize) -> Self {
        Self::new(LoadBalancePolicy::resolve(name), members)
    }

    /// Configured policy
    pub fn policy(&self) -> LoadBalancePolicy {
        self.policy
    }

    /// Policy in use right now, `Smart` after a fixed index degraded
    pub fn effective_policy(&self) -> LoadBalancePolicy {
        if self.degraded.load(Ordering::Acquire) {
            LoadBalancePolicy::Smart
        } else {
            self.policy
        }
    }

    /// Pick a backend.
    ///
    /// A fixed index beyond the registered backend count is a configuration
    /// error: the call fails with `IndexOutOfRange` and the balancer switches
    /// to `Smart` for all later calls. An index that is only out of range
    /// because backends were firewalled fails just that call.
    pub fn select(&self, candidates: &[BackendServer]) -> Result<BackendServer, SelectError> {
        let eligible: Vec<&BackendServer> = candidates.iter().filter(|b| !b.firewalled).collect();

        if eligible.is_empty() {
            return Err(SelectError::NoBackendAvailable);
        }

        let chosen = match self.effective_policy() {
            LoadBalancePolicy::Smart => smart(&eligible),
            LoadBalancePolicy::RoundRobin => {
                let n = self.cursor.fetch_add(1, Ordering::Relaxed);
                eligible[n % eligible.len()]
            }
            LoadBalancePolicy::FixedIndex(index) if index >= self.members => {
                if !self.degraded.swap(true, Ordering::AcqRel) {
                    error!(
                        index,
                        backends = self.members,
                        "load balance index out of range, use smart method now"
                    );
                }
                return Err(SelectError::IndexOutOfRange {
                    index,
                    len: self.members,
                });
            }
            LoadBalancePolicy::FixedIndex(index) => match eligible.get(index) {
                Some(backend) => *backend,
                None => {
                    return Err(SelectError::IndexOutOfRange {
                        index,
                        len: eligible.len(),
                    });
                }
            },
        };

        Ok(chosen.clone())
    }
}

fn smart<'a>(eligible: &[&'a BackendServer]) -> &'a BackendServer {
    // min_by_key keeps the first of equal keys, so ties go to registration order
    eligible
        .iter()
        .copied()
        .min_by_key(|b| {
            (
                b.stats.consecutive_failures(),
                b.stats.active_connections(),
            )
        })
        .unwrap_or(eligible[0])
}
