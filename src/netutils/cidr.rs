//! Simple CIDR block representation

// SPDX-License-Identifier: AGPL-3.0-or-later

#![allow(clippy::module_name_repetitions)]

use crate::addr::{ip_to_u32, u32_to_ip};
use crate::Error;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Network mask for a prefix length of at most 32
pub(crate) const fn prefix_mask(prefix_len: u8) -> u32 {
    match u32::MAX.checked_shl(32 - prefix_len as u32) {
        Some(mask) => mask,
        None => 0,
    }
}

/// A clean IPv4 CIDR block
///
/// The bits of `addr` below `prefix_len` are always zero.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "impl-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "impl-serde", serde(try_from = "String", into = "String"))]
pub struct Cidr4 {
    addr: Ipv4Addr,
    prefix_len: u8,
}

impl fmt::Display for Cidr4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl Cidr4 {
    /// Create a CIDR block, rejecting host bits set below the prefix
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, Error> {
        if prefix_len > 32 {
            return Err(Error::InvalidPrefixLength(prefix_len));
        }
        let mask = prefix_mask(prefix_len);
        let raw = ip_to_u32(addr);
        if raw & !mask != 0 {
            return Err(Error::DirtyMask {
                cidr: format!("{addr}/{prefix_len}"),
                fixed_short: Self::new_unchecked(u32_to_ip(raw & mask), prefix_len),
                fixed_long: Self::new_unchecked(addr, 32),
            });
        }
        Ok(Self { addr, prefix_len })
    }

    /// Caller guarantees `prefix_len <= 32` and that `addr` is clean
    pub(crate) const fn new_unchecked(addr: Ipv4Addr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }

    /// Network address
    #[must_use]
    pub const fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    #[must_use]
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Number of bits below the prefix
    #[must_use]
    pub const fn host_bits(&self) -> u8 {
        32 - self.prefix_len
    }

    #[must_use]
    pub const fn netmask(&self) -> Ipv4Addr {
        u32_to_ip(prefix_mask(self.prefix_len))
    }

    /// Number of addresses in the block, network and broadcast included
    #[must_use]
    pub const fn num_addrs(&self) -> u64 {
        1 << self.host_bits()
    }

    /// Highest address in the block
    #[must_use]
    pub const fn last_addr(&self) -> Ipv4Addr {
        u32_to_ip(ip_to_u32(self.addr) | !prefix_mask(self.prefix_len))
    }

    #[must_use]
    pub const fn contains_addr(&self, ip: Ipv4Addr) -> bool {
        ip_to_u32(ip) & prefix_mask(self.prefix_len) == ip_to_u32(self.addr)
    }

    /// Whether `other` lies entirely inside this block
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        other.prefix_len >= self.prefix_len && self.contains_addr(other.addr)
    }
}

impl FromStr for Cidr4 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::mask::parse_cidr_mask(s)
    }
}

impl TryFrom<String> for Cidr4 {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Cidr4> for String {
    fn from(cidr: Cidr4) -> Self {
        cidr.to_string()
    }
}
