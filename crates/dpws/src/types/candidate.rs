// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport candidates: where an endpoint might currently be reachable.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

/// Default communication manager id (SOAP-over-UDP/HTTP).
pub const DPWS_COMM_MANAGER_ID: &str = "DPWS";

/// Supported DPWS protocol versions.
///
/// Ordered oldest first. Fan-out sends one copy per configured version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "config-loaders", derive(serde::Deserialize))]
pub enum ProtocolVersion {
    /// DPWS February 2006 (WS-Discovery 2005/04).
    Dpws2006,
    /// DPWS 1.1 (OASIS, 2009/01 namespaces).
    Dpws2009,
    /// DPWS 1.1 errata / WS-DD 2011 profile.
    Dpws2011,
}

impl ProtocolVersion {
    /// All versions this crate knows about.
    pub const ALL: [ProtocolVersion; 3] = [
        ProtocolVersion::Dpws2006,
        ProtocolVersion::Dpws2009,
        ProtocolVersion::Dpws2011,
    ];

    /// Short display name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            ProtocolVersion::Dpws2006 => "DPWS2006",
            ProtocolVersion::Dpws2009 => "DPWS2009",
            ProtocolVersion::Dpws2011 => "DPWS2011",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Physical transport address (`http://host:port/path`).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TransportAddress {
    /// Host and port.
    pub socket: SocketAddr,
    /// Path component without the leading slash (may be empty).
    pub path: Arc<str>,
}

impl TransportAddress {
    pub fn new(socket: SocketAddr, path: impl Into<Arc<str>>) -> Self {
        Self {
            socket,
            path: path.into(),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.socket.ip()
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}/{}", self.socket, self.path)
    }
}

impl fmt::Debug for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Parse error for [`TransportAddress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(pub String);

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transport address: {}", self.0)
    }
}

impl std::error::Error for AddressParseError {}

impl FromStr for TransportAddress {
    type Err = AddressParseError;

    /// Accepts `http://ip:port/path`, `https://...`, `soap.udp://...` or a
    /// bare `ip:port/path`. Host names are not resolved.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = match s.find("://") {
            Some(idx) => &s[idx + 3..],
            None => s,
        };
        let (host, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };
        let socket = host
            .parse::<SocketAddr>()
            .map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Self::new(socket, path))
    }
}

/// A concrete address + protocol at which an endpoint might be reachable.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TransportCandidate {
    /// Network address.
    pub address: TransportAddress,
    /// Communication manager responsible for this address.
    pub comm_manager_id: Arc<str>,
    /// Protocol version, `None` while still unknown.
    pub version: Option<ProtocolVersion>,
}

impl TransportCandidate {
    /// Candidate on the default communication manager, version unknown.
    pub fn new(address: TransportAddress) -> Self {
        Self {
            address,
            comm_manager_id: DPWS_COMM_MANAGER_ID.into(),
            version: None,
        }
    }

    /// Builder: set protocol version.
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Builder: set communication manager id.
    pub fn with_comm_manager(mut self, id: impl Into<Arc<str>>) -> Self {
        self.comm_manager_id = id.into();
        self
    }

    /// Same destination, ignoring the (possibly learned) protocol version.
    pub fn same_target(&self, other: &TransportCandidate) -> bool {
        self.address == other.address && self.comm_manager_id == other.comm_manager_id
    }
}

impl fmt::Debug for TransportCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}[{}/{}]", self.address, self.comm_manager_id, v),
            None => write!(f, "{}[{}/?]", self.address, self.comm_manager_id),
        }
    }
}

impl fmt::Display for TransportCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_address() {
        let addr: TransportAddress = "http://192.168.1.20:5000/device/1".parse().unwrap();
        assert_eq!(addr.socket, "192.168.1.20:5000".parse().unwrap());
        assert_eq!(&*addr.path, "device/1");
        assert_eq!(addr.to_string(), "http://192.168.1.20:5000/device/1");
    }

    #[test]
    fn test_parse_bare_address() {
        let addr: TransportAddress = "10.0.0.1:80".parse().unwrap();
        assert_eq!(&*addr.path, "");
    }

    #[test]
    fn test_parse_rejects_hostnames() {
        assert!("http://printer.local:80/x".parse::<TransportAddress>().is_err());
    }

    #[test]
    fn test_same_target_ignores_version() {
        let addr: TransportAddress = "10.0.0.1:80/a".parse().unwrap();
        let a = TransportCandidate::new(addr.clone());
        let b = TransportCandidate::new(addr).with_version(ProtocolVersion::Dpws2009);
        assert!(a.same_target(&b));
        assert_ne!(a, b);
    }
}
