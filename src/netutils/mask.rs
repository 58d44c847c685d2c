//! Strict CIDR parsing

// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::cidr::Cidr4;
use crate::Error;
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Parse `a.b.c.d/n`, refusing networks with host bits set
///
/// A dirty network is not silently masked: the error carries both the
/// network masked down to the stated prefix and the address as a host
/// route, and the caller picks whichever was meant.
pub fn parse_cidr_mask(cidr: &str) -> Result<Cidr4, Error> {
    let net: Ipv4Net = cidr.parse().map_err(|e| {
        log::debug!("failed to parse {cidr:?}: {e}");
        Error::Syntax(cidr.to_string())
    })?;
    // ipnet takes octets like `010`; std refuses leading zeros
    let addr = cidr.split_once('/').map_or(cidr, |(addr, _)| addr);
    if addr.parse::<Ipv4Addr>().is_err() {
        log::debug!("refusing address with leading zeros in {cidr:?}");
        return Err(Error::Syntax(cidr.to_string()));
    }
    if net.addr() != net.network() {
        let fixed_short = Cidr4::new_unchecked(net.network(), net.prefix_len());
        let fixed_long = Cidr4::new_unchecked(net.addr(), 32);
        return Err(Error::DirtyMask {
            cidr: cidr.to_string(),
            fixed_short,
            fixed_long,
        });
    }
    Ok(Cidr4::new_unchecked(net.addr(), net.prefix_len()))
}
