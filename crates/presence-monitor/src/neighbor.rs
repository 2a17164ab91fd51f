//! Neighbor (ARP) table parsing.
//!
//! The reader runs `arp -a`, which prints both the reverse name and the IP
//! of every entry:
//!
//! ```text
//! router.lan (192.168.1.1) at aa:bb:cc:dd:ee:01 [ether] on eth0
//! ? (192.168.1.33) at <incomplete> on eth0
//! ```
//!
//! The columnar listing of plain net-tools `arp` is accepted too, for
//! `arp_path` replacements that print it:
//!
//! ```text
//! Address                  HWtype  HWaddress           Flags Mask            Iface
//! router.lan               ether   aa:bb:cc:dd:ee:01   C                     eth0
//! ```

use std::net::Ipv4Addr;

use presence_core::NeighborEntry;

/// Arguments for the neighbor table query.
pub fn table_args() -> [&'static str; 1] {
    ["-a"]
}

/// Parse the neighbor table, skipping headers, incomplete entries and
/// anything else that does not look like a resolved row.
pub fn parse_neighbor_table(output: &str) -> Vec<NeighborEntry> {
    output.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<NeighborEntry> {
    if line.contains("incomplete") || line.contains("HWtype") {
        return None;
    }
    let cols: Vec<&str> = line.split_whitespace().collect();
    if cols.get(2) == Some(&"at") {
        parse_listing(&cols)
    } else {
        parse_columns(&cols)
    }
}

/// `host (ip) at mac [ether] on iface`
fn parse_listing(cols: &[&str]) -> Option<NeighborEntry> {
    let ip: Ipv4Addr = cols[1]
        .trim_start_matches('(')
        .trim_end_matches(')')
        .parse()
        .ok()?;
    let link_address = *cols.get(3)?;
    if !is_link_address(link_address) {
        return None;
    }
    let interface = cols
        .iter()
        .skip_while(|c| **c != "on")
        .nth(1)?;

    let address = match cols[0] {
        "?" => ip.to_string(),
        host => host.to_string(),
    };
    Some(NeighborEntry {
        name: NeighborEntry::name_for(&address),
        address,
        ip: Some(ip),
        link_address: link_address.to_lowercase(),
        interface: interface.to_string(),
    })
}

/// Address, HWtype, HWaddress, Flags, [Mask,] Iface
fn parse_columns(cols: &[&str]) -> Option<NeighborEntry> {
    if cols.len() < 5 {
        return None;
    }
    let address = cols[0];
    let link_address = cols[2];
    let interface = cols[cols.len() - 1];
    if !is_link_address(link_address) {
        return None;
    }

    Some(NeighborEntry {
        name: NeighborEntry::name_for(address),
        address: address.to_string(),
        ip: address.parse().ok(),
        link_address: link_address.to_lowercase(),
        interface: interface.to_string(),
    })
}

fn is_link_address(s: &str) -> bool {
    let octets: Vec<&str> = s.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| !o.is_empty() && o.len() <= 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}
