//! Link-layer addressing.
//!
//! A Type-2 connection is identified by a pair of (SAP, MAC) addresses:
//! the local service access point bound on this station and the remote
//! one it talks to. Both are fixed for the lifetime of a connection.

use std::fmt;

/// A service access point identifier (one octet).
///
/// The low bit of a SAP octet distinguishes individual from group
/// addresses; Type-2 operation only uses individual SAPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SapId(pub u8);

impl SapId {
    /// The null SAP, addressing the station itself.
    pub const NULL: SapId = SapId(0x00);

    /// True if this is an individual (non-group) SAP.
    pub fn is_individual(&self) -> bool {
        self.0 & 0x01 == 0
    }
}

impl fmt::Display for SapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

impl From<u8> for SapId {
    fn from(v: u8) -> Self {
        Self(v)
    }
}

/// A 48-bit MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Create a MAC address from raw octets.
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Get the raw octets.
    pub fn octets(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

/// One endpoint of a data-link connection: a SAP on a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkAddr {
    /// Service access point.
    pub sap: SapId,
    /// Station MAC address.
    pub mac: MacAddr,
}

impl LinkAddr {
    /// Create a link address.
    pub fn new(sap: impl Into<SapId>, mac: impl Into<MacAddr>) -> Self {
        Self {
            sap: sap.into(),
            mac: mac.into(),
        }
    }
}

impl fmt::Display for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mac, self.sap)
    }
}

/// The (local, remote) address pair identifying one connection.
///
/// Used as the lookup key in the connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkPair {
    /// Local endpoint.
    pub local: LinkAddr,
    /// Remote endpoint.
    pub remote: LinkAddr,
}

impl LinkPair {
    /// Create a connection address pair.
    pub fn new(local: LinkAddr, remote: LinkAddr) -> Self {
        Self { local, remote }
    }
}

impl fmt::Display for LinkPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.local, self.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sap_individual() {
        assert!(SapId(0x42).is_individual());
        assert!(!SapId(0x43).is_individual());
        assert!(SapId::NULL.is_individual());
    }

    #[test]
    fn test_display() {
        let addr = LinkAddr::new(0x42u8, [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        assert_eq!(format!("{addr}"), "de:ad:be:ef:00:01/0x42");
    }

    #[test]
    fn test_pair_hash_key() {
        use std::collections::HashMap;

        let a = LinkAddr::new(0x42u8, [1, 2, 3, 4, 5, 6]);
        let b = LinkAddr::new(0x44u8, [6, 5, 4, 3, 2, 1]);
        let mut table = HashMap::new();
        table.insert(LinkPair::new(a, b), 7u32);

        assert_eq!(table.get(&LinkPair::new(a, b)), Some(&7));
        // Direction matters
        assert_eq!(table.get(&LinkPair::new(b, a)), None);
    }
}
