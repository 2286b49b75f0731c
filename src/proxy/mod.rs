//! Outbound admission and backend dispatch
//!
//! This module decides whether an inbound connection may reach its
//! destination and, if so, which backend server carries it.

pub mod address;
pub mod backend;
pub mod balancer;
pub mod dispatcher;
pub mod filter;
pub mod upstream;

pub use address::{DestinationAddress, Host};
pub use backend::{BackendId, BackendRegistry, BackendServer, BackendStats};
pub use balancer::{LoadBalancePolicy, LoadBalancer};
pub use dispatcher::{Dispatcher, Inbound, Relay};
pub use filter::{AddressFilter, IpRuleSet, PortRuleSet, Verdict};
pub use upstream::TcpRelay;
