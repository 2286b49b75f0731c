//! Outbound address filtering
//!
//! Decides whether a client may reach a destination. Rules are evaluated in
//! a fixed order and the first match wins:
//!
//! 1. denied port
//! 2. port not in the allow list while `port.deny == all`
//! 3. denied IP
//! 4. IP not in the allow list while `ip.deny == all`
//! 5. destination is one of our own backends (loop)
//!
//! A loop match also firewalls the matching backend in the registry.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};

use tracing::{debug, warn};

use crate::config::{RuleConfig, TargetConfig, UnhandledPolicy};
use crate::error::Denial;
use crate::proxy::address::DestinationAddress;
use crate::proxy::backend::BackendRegistry;

/// Outcome of a filter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(Denial),
}

impl Verdict {
    pub fn into_result(self) -> Result<(), Denial> {
        match self {
            Verdict::Allow => Ok(()),
            Verdict::Deny(denial) => Err(denial),
        }
    }
}

/// Deny and allow sets over one kind of value, plus the deny-all switch.
#[derive(Debug, Clone)]
pub struct RuleSet<T> {
    denied: HashSet<T>,
    allowed: HashSet<T>,
    deny_all: bool,
}

pub type PortRuleSet = RuleSet<u16>;
pub type IpRuleSet = RuleSet<Ipv4Addr>;

enum RuleMatch {
    Denied,
    NotAllowed,
    Pass,
}

impl<T: std::hash::Hash + Eq> RuleSet<T> {
    pub fn new(
        denied: impl IntoIterator<Item = T>,
        allowed: impl IntoIterator<Item = T>,
        deny_all: bool,
    ) -> Self {
        Self {
            denied: denied.into_iter().collect(),
            allowed: allowed.into_iter().collect(),
            deny_all,
        }
    }

    /// No rules, everything passes
    pub fn permissive() -> Self {
        Self::new([], [], false)
    }

    fn evaluate(&self, value: &T) -> RuleMatch {
        if self.denied.contains(value) {
            RuleMatch::Denied
        } else if self.deny_all && !self.allowed.contains(value) {
            RuleMatch::NotAllowed
        } else {
            RuleMatch::Pass
        }
    }
}

impl<T: std::hash::Hash + Eq + Clone> From<&RuleConfig<T>> for RuleSet<T> {
    fn from(config: &RuleConfig<T>) -> Self {
        Self::new(
            config.denied.iter().cloned(),
            config.allowed.iter().cloned(),
            config.deny_all(),
        )
    }
}

/// Evaluates destination rules and detects proxy loops
#[derive(Debug, Clone)]
pub struct AddressFilter {
    ports: PortRuleSet,
    ips: IpRuleSet,
    unhandled: UnhandledPolicy,
    registry: BackendRegistry,
}

impl AddressFilter {
    pub fn new(
        ports: PortRuleSet,
        ips: IpRuleSet,
        unhandled: UnhandledPolicy,
        registry: BackendRegistry,
    ) -> Self {
        Self {
            ports,
            ips,
            unhandled,
            registry,
        }
    }

    pub fn from_config(target: &TargetConfig, registry: BackendRegistry) -> Self {
        Self::new(
            PortRuleSet::from(&target.port),
            IpRuleSet::from(&target.ip),
            target.unhandled,
            registry,
        )
    }

    /// Check whether `peer` may reach `dest`.
    ///
    /// Denials are logged at warn, approvals at debug.
    pub async fn check(&self, dest: &DestinationAddress, peer: SocketAddr) -> Verdict {
        let Some(ip) = dest.as_ipv4() else {
            return match self.unhandled {
                UnhandledPolicy::Pass => {
                    debug!(peer = %peer, target = %dest, "Passing unfiltered destination");
                    Verdict::Allow
                }
                UnhandledPolicy::Deny => deny(peer, dest, Denial::UnhandledAddressKind),
            };
        };
        let port = dest.port;

        match self.ports.evaluate(&port) {
            RuleMatch::Denied => return deny(peer, dest, Denial::DeniedPort),
            RuleMatch::NotAllowed => return deny(peer, dest, Denial::NotAllowedPort),
            RuleMatch::Pass => {}
        }

        match self.ips.evaluate(&ip) {
            RuleMatch::Denied => return deny(peer, dest, Denial::DeniedIp),
            RuleMatch::NotAllowed => return deny(peer, dest, Denial::NotAllowedIp),
            RuleMatch::Pass => {}
        }

        let looped = self.registry.bound_to(ip, port).await;
        if !looped.is_empty() {
            for id in looped {
                self.registry.mark_firewalled(id).await;
            }
            return deny(peer, dest, Denial::LoopProxy);
        }

        debug!(peer = %peer, target = %dest, "try to access");
        Verdict::Allow
    }
}

fn deny(peer: SocketAddr, dest: &DestinationAddress, reason: Denial) -> Verdict {
    warn!(peer = %peer, target = %dest, reason = %reason, "Outbound connection denied");
    Verdict::Deny(reason)
}
