//! Small network helpers: CIDR matching for trusted proxies and the admin
//! allowlist, plus private-range checks for the export SSRF guard.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Parses `a.b.c.d/n`, `::1/128`, or a bare address (host route).
    pub fn parse(s: &str) -> Option<Self> {
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };

        let network: IpAddr = addr_part.trim().parse().ok()?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix_part {
            Some(p) => p.trim().parse().ok().filter(|n| *n <= max)?,
            None => max,
        };

        Some(Self { network, prefix })
    }

    pub fn parse_list(items: &[String]) -> Vec<Self> {
        items.iter().filter_map(|s| Self::parse(s)).collect()
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix as u32)
                };
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix as u32)
                };
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

pub fn any_contains(cidrs: &[Cidr], addr: IpAddr) -> bool {
    cidrs.iter().any(|c| c.contains(addr))
}

/// True for addresses an export webhook must never reach: loopback, RFC1918,
/// link-local, CGNAT, and their IPv6 counterparts.
pub fn is_private_or_local(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(ip) => {
            ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_unspecified()
                || is_cgnat(ip)
        }
        IpAddr::V6(ip) => {
            ip.is_loopback() || ip.is_unspecified() || is_unique_local(ip) || is_v6_link_local(ip)
        }
    }
}

fn is_cgnat(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 100 && (64..=127).contains(&octets[1])
}

fn is_unique_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

fn is_v6_link_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_parse_and_match_v4() {
        let cidr = Cidr::parse("10.0.0.0/8").unwrap();
        assert!(cidr.contains("10.1.2.3".parse().unwrap()));
        assert!(!cidr.contains("11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_bare_address_is_host_route() {
        let cidr = Cidr::parse("192.168.1.5").unwrap();
        assert!(cidr.contains("192.168.1.5".parse().unwrap()));
        assert!(!cidr.contains("192.168.1.6".parse().unwrap()));
    }

    #[test]
    fn test_cidr_parse_v6() {
        let cidr = Cidr::parse("fd00::/8").unwrap();
        assert!(cidr.contains("fd12::1".parse().unwrap()));
        assert!(!cidr.contains("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_invalid_cidr_rejected() {
        assert!(Cidr::parse("not-an-ip/24").is_none());
        assert!(Cidr::parse("10.0.0.0/33").is_none());
        assert!(Cidr::parse("").is_none());
    }

    #[test]
    fn test_v4_v6_never_match() {
        let cidr = Cidr::parse("10.0.0.0/8").unwrap();
        assert!(!cidr.contains("::1".parse().unwrap()));
    }

    #[test]
    fn test_private_ranges_blocked() {
        for addr in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.0.1",
            "169.254.1.1",
            "100.64.0.1",
            "::1",
            "fd00::1",
            "fe80::1",
        ] {
            assert!(
                is_private_or_local(addr.parse().unwrap()),
                "{} should be private",
                addr
            );
        }
    }

    #[test]
    fn test_public_addresses_allowed() {
        for addr in ["8.8.8.8", "93.184.216.34", "2001:db8::1"] {
            assert!(!is_private_or_local(addr.parse().unwrap()));
        }
    }
}
