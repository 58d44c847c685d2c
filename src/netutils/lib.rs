//! netutils -- carve a parent IPv4 network into fixed-size subnets
//!
//! The allocator hands out subnets in ascending address order, never
//! twice, and never from an excluded range. Everything else here is the
//! pure address arithmetic it is built on.

// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod addr;
pub mod allocator;
pub mod cidr;
mod gateway;
mod mask;

pub use addr::{ip_to_u32, u32_to_ip};
pub use allocator::{AllocatorState, SubnetAllocator};
pub use cidr::Cidr4;
pub use gateway::generate_default_gateway;
pub use mask::parse_cidr_mask;

/// Broad classes of [`Error`]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// CIDR text could not be parsed at all
    Syntax,
    /// Bits below the prefix length are set
    DirtyMask,
    /// Parent, subnet size or exclusions do not fit together
    Configuration,
    /// Every subnet is taken
    Exhaustion,
    /// Allocation state disagrees with what the caller asked for
    StateConflict,
}

/// Subnet allocation errors
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("invalid CIDR notation {0:?}")]
    Syntax(String),
    #[error("CIDR network specification {cidr:?} is not in canonical form (should be {fixed_short} or {fixed_long}?)")]
    DirtyMask {
        cidr: String,
        fixed_short: Cidr4,
        fixed_long: Cidr4,
    },
    #[error("invalid prefix length {0}")]
    InvalidPrefixLength(u8),
    #[error("subnets of {host_bits} host bits do not fit in {parent}")]
    SubnetTooLarge { parent: Cidr4, host_bits: u8 },
    #[error("splitting {parent} into /{subnet_prefix_len} subnets yields too many subnets")]
    TooManySubnets { parent: Cidr4, subnet_prefix_len: u8 },
    #[error("{subnet} is not inside {parent}")]
    OutsideParent { subnet: Cidr4, parent: Cidr4 },
    #[error("{subnet} is not aligned to a /{subnet_prefix_len} subnet boundary")]
    Misaligned { subnet: Cidr4, subnet_prefix_len: u8 },
    #[error("no free subnets left in {0}")]
    Exhausted(Cidr4),
    #[error("{0} is already allocated")]
    AlreadyAllocated(Cidr4),
    #[error("{0} is excluded from allocation")]
    Excluded(Cidr4),
    #[error("{0} is not allocated")]
    NotAllocated(Cidr4),
    #[error("{0} has no usable host address")]
    NoUsableHost(Cidr4),
}

impl Error {
    /// Classify the error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Syntax(_) => ErrorKind::Syntax,
            Self::DirtyMask { .. } => ErrorKind::DirtyMask,
            Self::InvalidPrefixLength(_)
            | Self::SubnetTooLarge { .. }
            | Self::TooManySubnets { .. }
            | Self::OutsideParent { .. }
            | Self::Misaligned { .. }
            | Self::NoUsableHost(_) => ErrorKind::Configuration,
            Self::Exhausted(_) => ErrorKind::Exhaustion,
            Self::AlreadyAllocated(_) | Self::Excluded(_) | Self::NotAllocated(_) => {
                ErrorKind::StateConflict
            }
        }
    }
}
