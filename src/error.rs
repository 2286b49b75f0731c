//! Error types surfaced by the admission and dispatch path.
//!
//! Admission denials and backend selection failures are kept in separate
//! enums so callers can alert on an empty or misconfigured backend set
//! without confusing it with ordinary filtered traffic.

use std::io;

use thiserror::Error;

/// Reason an outbound connection was refused by the address filter.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    #[error("try to access denied port")]
    DeniedPort,

    #[error("try to access not allowed port")]
    NotAllowedPort,

    #[error("try to access denied IP")]
    DeniedIp,

    #[error("try to access not allowed IP")]
    NotAllowedIp,

    /// The destination is one of our own backends.
    #[error("try to access proxy server")]
    LoopProxy,

    /// IPv6 and domain destinations are not filtered and are refused
    /// unless the configuration opts into passing them through.
    #[error("destination address kind is not handled")]
    UnhandledAddressKind,
}

/// Failure to pick a backend for an admitted connection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    #[error("no backend server available")]
    NoBackendAvailable,

    #[error("backend index {index} out of range ({len} candidates)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Everything `Dispatcher::handle_outbound` can fail with.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("connection denied: {0}")]
    Denied(#[from] Denial),

    #[error("backend selection failed: {0}")]
    Select(#[from] SelectError),

    #[error("relay failed: {0}")]
    Relay(#[source] io::Error),
}

impl DispatchError {
    /// True for admission denials.
    pub fn is_denial(&self) -> bool {
        matches!(self, DispatchError::Denied(_))
    }

    /// True when no backend could be chosen.
    pub fn is_selection(&self) -> bool {
        matches!(self, DispatchError::Select(_))
    }

    pub fn denial(&self) -> Option<Denial> {
        match self {
            DispatchError::Denied(d) => Some(*d),
            _ => None,
        }
    }
}

/// Destination header decoding errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// More bytes are needed before the header can be decoded.
    #[error("incomplete destination header")]
    Incomplete,

    #[error("unknown destination address kind {0}")]
    UnknownKind(u8),

    #[error("invalid domain name in destination header")]
    InvalidDomain,
}
