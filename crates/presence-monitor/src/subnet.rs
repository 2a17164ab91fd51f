//! Local subnet enumeration for bulk sweeps.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;

/// Subnets this small are probed in full, network and broadcast included.
const TINY_RANGE: u64 = 4;

/// Prefixes shorter than this take hours to sweep and are logged as such.
const WIDE_PREFIX: u8 = 16;

/// One local, non-loopback IPv4 network attached to an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub interface: String,
    pub net: Ipv4Net,
}

impl Subnet {
    /// Build a subnet from an interface address. Loopback, IPv6, unspecified
    /// and link-local addresses are not swept.
    pub fn from_interface(interface: &str, addr: IpAddr, prefix: u8) -> Option<Self> {
        let IpAddr::V4(ip) = addr else {
            return None;
        };
        if ip.is_loopback() || ip.is_unspecified() || ip.is_link_local() {
            return None;
        }
        let net = Ipv4Net::new(ip, prefix).ok()?.trunc();
        Some(Self {
            interface: interface.to_string(),
            net,
        })
    }

    /// Number of addresses in the range, network and broadcast included.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.net.prefix_len()))
    }

    pub fn is_wide(&self) -> bool {
        self.net.prefix_len() < WIDE_PREFIX
    }

    /// Number of addresses [`probe_targets`](Self::probe_targets) yields.
    pub fn target_count(&self) -> u64 {
        let size = self.size();
        if size <= TINY_RANGE {
            size
        } else {
            size - 2
        }
    }

    /// Addresses to probe: the whole range without its first and last
    /// address, unless the range is tiny. Produced lazily.
    pub fn probe_targets(&self) -> impl Iterator<Item = Ipv4Addr> {
        let first = u32::from(self.net.network());
        let last = u32::from(self.net.broadcast());
        let (first, last) = if self.size() <= TINY_RANGE {
            (first, last)
        } else {
            (first + 1, last - 1)
        };
        (first..=last).map(Ipv4Addr::from)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.net, self.interface)
    }
}

/// Subnets of every configured interface on this host.
pub fn local_subnets() -> Vec<Subnet> {
    let subnets: Vec<Subnet> = pnet_datalink::interfaces()
        .iter()
        .filter(|iface| !iface.is_loopback())
        .flat_map(|iface| {
            iface
                .ips
                .iter()
                .filter_map(|ip| Subnet::from_interface(&iface.name, ip.ip(), ip.prefix()))
        })
        .collect();

    for subnet in &subnets {
        tracing::debug!(subnet = %subnet, "Interface");
        if subnet.is_wide() {
            tracing::warn!(
                subnet = %subnet,
                addresses = subnet.target_count(),
                "Very large subnet, bulk sweeps will be slow"
            );
        }
    }
    subnets
}
