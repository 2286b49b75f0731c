//! Relaygate - multi-backend relay proxy
//!
//! Core library for outbound admission control and backend dispatch.

pub mod config;
pub mod error;
pub mod proxy;
pub mod server;
