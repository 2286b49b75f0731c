//! Destination address header
//!
//! Every inbound connection starts with the address the client wants to
//! reach. One leading byte selects the kind, followed by the address and a
//! big-endian port:
//!
//! ```text
//! 1 | a b c d | port_hi port_lo          IPv4
//! 3 | len | host ... | port_hi port_lo    domain name
//! 4 | 16 address bytes | port_hi port_lo  IPv6
//! ```

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::AddressError;

pub const KIND_IPV4: u8 = 1;
pub const KIND_DOMAIN: u8 = 3;
pub const KIND_IPV6: u8 = 4;

/// Host part of a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

/// Decoded destination of an outbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationAddress {
    pub host: Host,
    pub port: u16,
}

impl DestinationAddress {
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        Self {
            host: Host::Ipv4(ip),
            port,
        }
    }

    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        Self {
            host: Host::Ipv6(ip),
            port,
        }
    }

    pub fn domain(name: impl Into<String>, port: u16) -> Self {
        Self {
            host: Host::Domain(name.into()),
            port,
        }
    }

    /// The kind byte used on the wire.
    pub fn kind(&self) -> u8 {
        match self.host {
            Host::Ipv4(_) => KIND_IPV4,
            Host::Domain(_) => KIND_DOMAIN,
            Host::Ipv6(_) => KIND_IPV6,
        }
    }

    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        match self.host {
            Host::Ipv4(ip) => Some(ip),
            _ => None,
        }
    }

    /// Decode a header from the front of `buf`.
    ///
    /// Returns the address together with the number of bytes consumed, or
    /// `AddressError::Incomplete` if `buf` does not hold a full header yet.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), AddressError> {
        let kind = *buf.first().ok_or(AddressError::Incomplete)?;

        match kind {
            KIND_IPV4 => {
                let body = take(buf, 1, 4 + 2)?;
                let ip = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
                let port = u16::from_be_bytes([body[4], body[5]]);
                Ok((Self::ipv4(ip, port), 1 + 4 + 2))
            }
            KIND_IPV6 => {
                let body = take(buf, 1, 16 + 2)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&body[..16]);
                let port = u16::from_be_bytes([body[16], body[17]]);
                Ok((Self::ipv6(Ipv6Addr::from(octets), port), 1 + 16 + 2))
            }
            KIND_DOMAIN => {
                let len = *buf.get(1).ok_or(AddressError::Incomplete)? as usize;
                if len == 0 {
                    return Err(AddressError::InvalidDomain);
                }
                let body = take(buf, 2, len + 2)?;
                let name = std::str::from_utf8(&body[..len])
                    .map_err(|_| AddressError::InvalidDomain)?;
                let port = u16::from_be_bytes([body[len], body[len + 1]]);
                Ok((Self::domain(name, port), 2 + len + 2))
            }
            other => Err(AddressError::UnknownKind(other)),
        }
    }

    /// Encode the header in wire format.
    ///
    /// Domain names must be 1 to 255 bytes, the length is a single byte.
    pub fn encode(&self) -> Result<Vec<u8>, AddressError> {
        let mut buf = Vec::with_capacity(19);
        buf.push(self.kind());
        match &self.host {
            Host::Ipv4(ip) => buf.extend_from_slice(&ip.octets()),
            Host::Ipv6(ip) => buf.extend_from_slice(&ip.octets()),
            Host::Domain(name) => {
                let len = u8::try_from(name.len()).map_err(|_| AddressError::InvalidDomain)?;
                if len == 0 {
                    return Err(AddressError::InvalidDomain);
                }
                buf.push(len);
                buf.extend_from_slice(name.as_bytes());
            }
        }
        buf.extend_from_slice(&self.port.to_be_bytes());
        Ok(buf)
    }
}

fn take(buf: &[u8], start: usize, len: usize) -> Result<&[u8], AddressError> {
    buf.get(start..start + len).ok_or(AddressError::Incomplete)
}

impl fmt::Display for DestinationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ipv4(ip) => write!(f, "{}:{}", ip, self.port),
            Host::Ipv6(ip) => write!(f, "[{}]:{}", ip, self.port),
            Host::Domain(name) => write!(f, "{}:{}", name, self.port),
        }
    }
}
