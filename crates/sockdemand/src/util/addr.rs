//! Address decoding and formatting utilities.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::sockdiag::types::AddressFamily;

/// Error type for address decoding.
#[derive(Debug, thiserror::Error)]
pub enum AddrError {
    #[error("invalid hex address: {0}")]
    InvalidHex(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("malformed endpoint: {0}")]
    MalformedEndpoint(String),
}

pub type Result<T> = std::result::Result<T, AddrError>;

/// Decode one 8-digit kernel word into its four bytes in network order.
fn hex_word(word: &str) -> Result<[u8; 4]> {
    let value =
        u32::from_str_radix(word, 16).map_err(|_| AddrError::InvalidHex(word.to_string()))?;
    // /proc prints the in-memory word; its low byte is the first octet.
    Ok(value.to_le_bytes())
}

/// Decode a /proc/net hex address.
///
/// IPv4 is one 8-digit word, IPv6 four of them. Each word is byte-reversed.
pub fn parse_hex_ip(hex: &str, family: AddressFamily) -> Result<IpAddr> {
    if !hex.is_ascii() {
        return Err(AddrError::InvalidHex(hex.to_string()));
    }
    match (family, hex.len()) {
        (AddressFamily::Inet, 8) => Ok(IpAddr::V4(Ipv4Addr::from(hex_word(hex)?))),
        (AddressFamily::Inet6, 32) => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                chunk.copy_from_slice(&hex_word(&hex[i * 8..i * 8 + 8])?);
            }
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => Err(AddrError::InvalidHex(hex.to_string())),
    }
}

/// Decode a hex port.
pub fn parse_hex_port(hex: &str) -> Result<u16> {
    u16::from_str_radix(hex, 16).map_err(|_| AddrError::InvalidPort(hex.to_string()))
}

/// Decode a `HEXADDR:HEXPORT` column into an address and port.
pub fn parse_hex_endpoint(field: &str, family: AddressFamily) -> Result<(IpAddr, u16)> {
    let (addr, port) = field
        .split_once(':')
        .ok_or_else(|| AddrError::MalformedEndpoint(field.to_string()))?;
    Ok((parse_hex_ip(addr, family)?, parse_hex_port(port)?))
}

/// Format a host address for display and for use as a map key.
///
/// IPv6 hosts print their first six groups with the longest zero run
/// collapsed to `::`, followed by the last 32 bits in dotted form.
pub fn format_host(addr: &IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format_v6_host(v6),
    }
}

fn format_v6_host(addr: &Ipv6Addr) -> String {
    let segments = addr.segments();
    let groups = &segments[..6];
    let octets = addr.octets();
    let suffix = Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]);

    // Longest run of zero groups; the first one wins a tie.
    let mut best: Option<(usize, usize)> = None;
    let mut i = 0;
    while i < groups.len() {
        if groups[i] != 0 {
            i += 1;
            continue;
        }
        let start = i;
        while i < groups.len() && groups[i] == 0 {
            i += 1;
        }
        if best.is_none_or(|(s, e)| i - start > e - s) {
            best = Some((start, i));
        }
    }

    let join = |gs: &[u16]| {
        gs.iter()
            .map(|g| format!("{:x}", g))
            .collect::<Vec<_>>()
            .join(":")
    };

    match best {
        Some((start, end)) => {
            let tail = join(&groups[end..]);
            if tail.is_empty() {
                format!("{}::{}", join(&groups[..start]), suffix)
            } else {
                format!("{}::{}:{}", join(&groups[..start]), tail, suffix)
            }
        }
        None => format!("{}:{}", join(groups), suffix),
    }
}

/// Set of addresses that belong to this host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalAddrs {
    addrs: BTreeSet<IpAddr>,
}

impl LocalAddrs {
    /// Build a set from explicit addresses.
    pub fn new(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            addrs: addrs.into_iter().collect(),
        }
    }

    /// Add one address.
    pub fn insert(&mut self, addr: IpAddr) {
        self.addrs.insert(addr);
    }

    /// Whether `addr` names this host.
    ///
    /// IPv4-mapped and IPv4-compatible IPv6 addresses match on their embedded
    /// IPv4 address.
    pub fn is_local(&self, addr: &IpAddr) -> bool {
        if self.addrs.contains(addr) {
            return true;
        }
        match addr {
            IpAddr::V6(v6) if !v6.is_loopback() && !v6.is_unspecified() => v6
                .to_ipv4()
                .is_some_and(|v4| self.addrs.contains(&IpAddr::V4(v4))),
            _ => false,
        }
    }

    /// Number of addresses in the set.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Iterate over the addresses.
    pub fn iter(&self) -> impl Iterator<Item = &IpAddr> {
        self.addrs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_loopback_endpoint() {
        let (ip, port) = parse_hex_endpoint("0100007F:1F90", AddressFamily::Inet).unwrap();
        assert_eq!(format_host(&ip), "127.0.0.1");
        assert_eq!(port, 8080);
    }

    #[test]
    fn test_ipv6_mapped_loopback() {
        let hex = "0000000000000000FFFF00000100007F";
        let ip = parse_hex_ip(hex, AddressFamily::Inet6).unwrap();
        assert_eq!(ip, "::ffff:127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(format_host(&ip), "::ffff:127.0.0.1");
    }

    #[test]
    fn test_ipv6_any() {
        let ip = parse_hex_ip(&"0".repeat(32), AddressFamily::Inet6).unwrap();
        assert_eq!(format_host(&ip), "::0.0.0.0");
    }

    #[test]
    fn test_ipv6_collapses_only_longest_run() {
        let ip: IpAddr = "2001:0:0:1:0:0:0:5".parse().unwrap();
        assert_eq!(format_host(&ip), "2001::1:0:0:0.0.0.5");

        let ip: IpAddr = "2001:0:1:0:0:0:a:b".parse().unwrap();
        assert_eq!(format_host(&ip), "2001:0:1::0.10.0.11");

        let ip: IpAddr = "fe80::1234:5678".parse().unwrap();
        assert_eq!(format_host(&ip), "fe80::18.52.86.120");
    }

    #[test]
    fn test_ipv6_without_zero_groups() {
        let ip: IpAddr = "2001:db8:1:2:3:4:506:708".parse().unwrap();
        assert_eq!(format_host(&ip), "2001:db8:1:2:3:4:5.6.7.8");
    }

    #[test]
    fn test_rejects_bad_hex() {
        assert!(parse_hex_endpoint("0100007G:1F90", AddressFamily::Inet).is_err());
        assert!(parse_hex_endpoint("0100007F", AddressFamily::Inet).is_err());
        assert!(parse_hex_ip("0100007F", AddressFamily::Inet6).is_err());
    }

    #[test]
    fn test_local_addrs_embedded_v4() {
        let local = LocalAddrs::new(["127.0.0.1".parse().unwrap(), "10.1.2.3".parse().unwrap()]);
        assert!(local.is_local(&"::ffff:10.1.2.3".parse().unwrap()));
        assert!(local.is_local(&"127.0.0.1".parse().unwrap()));
        assert!(!local.is_local(&"::1".parse().unwrap()));
        assert!(!local.is_local(&"8.8.8.8".parse().unwrap()));
    }
}
