//! IPv4 address to integer conversion

// SPDX-License-Identifier: AGPL-3.0-or-later

use std::net::{IpAddr, Ipv4Addr};

/// Interpret an IPv4 address as a big-endian integer
///
/// `10.1.2.3` becomes `0x0A01_0203`.
#[must_use]
pub const fn ip_to_u32(ip: Ipv4Addr) -> u32 {
    u32::from_be_bytes(ip.octets())
}

/// Inverse of [`ip_to_u32`]
#[must_use]
pub const fn u32_to_ip(u: u32) -> Ipv4Addr {
    let [a, b, c, d] = u.to_be_bytes();
    Ipv4Addr::new(a, b, c, d)
}

/// Get the 4-byte form of an address, unwrapping IPv4-mapped IPv6 addresses
#[must_use]
pub fn to_ipv4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(ip) => ip.to_ipv4_mapped(),
    }
}
