//! Default gateway selection

// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::addr::{ip_to_u32, u32_to_ip};
use crate::cidr::Cidr4;
use crate::Error;
use std::net::Ipv4Addr;

/// First usable host address of a subnet, e.g. `10.1.0.1` for `10.1.0.0/24`
///
/// /31 and /32 subnets have no address beyond the network address that
/// is not also the broadcast address, so they are refused.
pub fn generate_default_gateway(subnet: &Cidr4) -> Result<Ipv4Addr, Error> {
    if subnet.prefix_len() > 30 {
        return Err(Error::NoUsableHost(*subnet));
    }
    Ok(u32_to_ip(ip_to_u32(subnet.addr()) + 1))
}
