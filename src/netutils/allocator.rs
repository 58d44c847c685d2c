//! Fixed-size subnet allocation
//!
//! The parent network is split into `2^(subnet_prefix_len - parent_prefix_len)`
//! equally sized subnets, numbered by address. Each index is free,
//! allocated or excluded; the lowest free index is always handed out first.

// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::addr::{ip_to_u32, u32_to_ip};
use crate::cidr::Cidr4;
use crate::mask::parse_cidr_mask;
use crate::Error;
use bitvec::vec::BitVec;
use parking_lot::Mutex;

/// Largest number of subnet bits (and so `2^24` subnets) a parent may be split into
pub const MAX_SUBNET_BITS: u8 = 24;

/// Plain copy of an allocator's configuration and state
///
/// Enough to rebuild an equivalent allocator with
/// [`SubnetAllocator::from_state`]; storing it anywhere is up to the caller.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "impl-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AllocatorState {
    pub parent: Cidr4,
    pub host_bits: u8,
    /// Excluded subnets, one entry per subnet
    pub excluded: Vec<Cidr4>,
    pub allocated: Vec<Cidr4>,
}

/// Membership bitmaps
///
/// `used` is the union of allocated and excluded, so the next free
/// index is simply its first zero.
#[derive(Debug)]
struct Pool {
    used: BitVec,
    excluded: BitVec,
    n_allocated: usize,
    n_excluded: usize,
}

impl Pool {
    fn new(total: usize) -> Self {
        Self {
            used: BitVec::repeat(false, total),
            excluded: BitVec::repeat(false, total),
            n_allocated: 0,
            n_excluded: 0,
        }
    }

    fn exclude(&mut self, index: usize) {
        if !self.excluded[index] {
            self.excluded.set(index, true);
            self.used.set(index, true);
            self.n_excluded += 1;
        }
    }

    fn is_allocated(&self, index: usize) -> bool {
        self.used[index] && !self.excluded[index]
    }
}

/// Hands out fixed-size subnets of a parent network
///
/// All operations lock an internal mutex for a short in-memory critical
/// section, so a single allocator can be shared between threads through
/// an `Arc`.
#[derive(Debug)]
pub struct SubnetAllocator {
    parent: Cidr4,
    subnet_prefix_len: u8,
    pool: Mutex<Pool>,
}

impl SubnetAllocator {
    /// Create an allocator handing out subnets with `host_bits` host bits
    ///
    /// `host_bits = 8` splits `10.1.0.0/16` into `/24`s. Every entry of
    /// `exclude` must be a clean CIDR inside `parent` that covers one or
    /// more whole subnets; the subnets it covers are never handed out.
    pub fn new(parent: &str, host_bits: u8, exclude: &[&str]) -> Result<Self, Error> {
        let parent = parse_cidr_mask(parent)?;
        let exclude = exclude
            .iter()
            .map(|cidr| parse_cidr_mask(cidr))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_parts(parent, host_bits, &exclude)
    }

    /// Like [`SubnetAllocator::new`] but sized by the subnet prefix length
    pub fn with_subnet_prefix_len(
        parent: &str,
        subnet_prefix_len: u8,
        exclude: &[&str],
    ) -> Result<Self, Error> {
        if subnet_prefix_len > 32 {
            return Err(Error::InvalidPrefixLength(subnet_prefix_len));
        }
        Self::new(parent, 32 - subnet_prefix_len, exclude)
    }

    /// Like [`SubnetAllocator::new`] but with already parsed networks
    pub fn from_parts(parent: Cidr4, host_bits: u8, exclude: &[Cidr4]) -> Result<Self, Error> {
        if host_bits > parent.host_bits() {
            return Err(Error::SubnetTooLarge { parent, host_bits });
        }
        let subnet_prefix_len = 32 - host_bits;
        let subnet_bits = subnet_prefix_len - parent.prefix_len();
        if subnet_bits > MAX_SUBNET_BITS {
            return Err(Error::TooManySubnets {
                parent,
                subnet_prefix_len,
            });
        }
        let allocator = Self {
            parent,
            subnet_prefix_len,
            pool: Mutex::new(Pool::new(1 << subnet_bits)),
        };
        {
            let mut pool = allocator.pool.lock();
            for cidr in exclude {
                let (first, count) = allocator.covered_indices(cidr)?;
                log::debug!("{parent}: excluding {cidr} ({count} subnets)");
                for index in first..first + count {
                    pool.exclude(index);
                }
            }
        }
        log::debug!(
            "{parent}: allocating /{subnet_prefix_len} subnets, {} in total",
            allocator.total_subnets()
        );
        Ok(allocator)
    }

    /// Rebuild an allocator from a snapshot
    pub fn from_state(state: &AllocatorState) -> Result<Self, Error> {
        let allocator = Self::from_parts(state.parent, state.host_bits, &state.excluded)?;
        for subnet in &state.allocated {
            allocator.mark_allocated(subnet)?;
        }
        Ok(allocator)
    }

    /// Take a consistent copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> AllocatorState {
        let pool = self.pool.lock();
        AllocatorState {
            parent: self.parent,
            host_bits: 32 - self.subnet_prefix_len,
            excluded: pool
                .excluded
                .iter_ones()
                .map(|index| self.subnet_at(index))
                .collect(),
            allocated: self.allocated_in(&pool),
        }
    }

    #[must_use]
    pub const fn parent(&self) -> Cidr4 {
        self.parent
    }

    /// Prefix length of every subnet handed out
    #[must_use]
    pub const fn subnet_prefix_len(&self) -> u8 {
        self.subnet_prefix_len
    }

    #[must_use]
    pub const fn host_bits(&self) -> u8 {
        32 - self.subnet_prefix_len
    }

    /// Number of subnets the parent is split into
    #[must_use]
    pub const fn total_subnets(&self) -> usize {
        1 << (self.subnet_prefix_len - self.parent.prefix_len())
    }

    /// Number of subnets neither allocated nor excluded
    #[must_use]
    pub fn free_count(&self) -> usize {
        let pool = self.pool.lock();
        self.total_subnets() - pool.n_allocated - pool.n_excluded
    }

    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.pool.lock().n_allocated
    }

    #[must_use]
    pub fn excluded_count(&self) -> usize {
        self.pool.lock().n_excluded
    }

    /// Currently allocated subnets in ascending order
    #[must_use]
    pub fn allocated_networks(&self) -> Vec<Cidr4> {
        self.allocated_in(&self.pool.lock())
    }

    /// Excluded subnets in ascending order
    #[must_use]
    pub fn excluded_networks(&self) -> Vec<Cidr4> {
        self.pool
            .lock()
            .excluded
            .iter_ones()
            .map(|index| self.subnet_at(index))
            .collect()
    }

    /// Whether `subnet` is currently allocated
    ///
    /// Anything that is not exactly one of our subnets is not allocated.
    #[must_use]
    pub fn is_allocated(&self, subnet: &Cidr4) -> bool {
        self.subnet_index(subnet)
            .is_ok_and(|index| self.pool.lock().is_allocated(index))
    }

    /// Claim the lowest-addressed free subnet
    pub fn get_network(&self) -> Result<Cidr4, Error> {
        let mut pool = self.pool.lock();
        let Some(index) = pool.used.first_zero() else {
            log::warn!("{}: no free subnets left", self.parent);
            return Err(Error::Exhausted(self.parent));
        };
        pool.used.set(index, true);
        pool.n_allocated += 1;
        drop(pool);
        let subnet = self.subnet_at(index);
        log::debug!("{}: allocated {subnet}", self.parent);
        Ok(subnet)
    }

    /// Claim a specific subnet, e.g. when replaying allocations after a restart
    pub fn mark_allocated(&self, subnet: &Cidr4) -> Result<(), Error> {
        let index = self.subnet_index(subnet)?;
        let mut pool = self.pool.lock();
        if pool.excluded[index] {
            return Err(Error::Excluded(*subnet));
        }
        if pool.used[index] {
            return Err(Error::AlreadyAllocated(*subnet));
        }
        pool.used.set(index, true);
        pool.n_allocated += 1;
        drop(pool);
        log::debug!("{}: marked {subnet} as allocated", self.parent);
        Ok(())
    }

    /// Return an allocated subnet to the free pool
    pub fn release_network(&self, subnet: &Cidr4) -> Result<(), Error> {
        let index = self.subnet_index(subnet)?;
        let mut pool = self.pool.lock();
        if pool.excluded[index] {
            return Err(Error::Excluded(*subnet));
        }
        if !pool.used[index] {
            return Err(Error::NotAllocated(*subnet));
        }
        pool.used.set(index, false);
        pool.n_allocated -= 1;
        drop(pool);
        log::debug!("{}: released {subnet}", self.parent);
        Ok(())
    }

    fn allocated_in(&self, pool: &Pool) -> Vec<Cidr4> {
        pool.used
            .iter_ones()
            .filter(|&index| !pool.excluded[index])
            .map(|index| self.subnet_at(index))
            .collect()
    }

    /// Subnet with the given index
    fn subnet_at(&self, index: usize) -> Cidr4 {
        let base = u64::from(ip_to_u32(self.parent.addr()));
        let offset = (index as u64) << (32 - self.subnet_prefix_len);
        // Index is below total_subnets, so the sum stays inside the parent
        #[allow(clippy::cast_possible_truncation)]
        let addr = u32_to_ip((base + offset) as u32);
        Cidr4::new_unchecked(addr, self.subnet_prefix_len)
    }

    /// Index of a subnet that must be exactly one subnet in size
    fn subnet_index(&self, subnet: &Cidr4) -> Result<usize, Error> {
        if subnet.prefix_len() != self.subnet_prefix_len {
            return Err(self.placement_error(subnet));
        }
        self.covered_indices(subnet).map(|(first, _)| first)
    }

    /// First index and number of subnets covered by `cidr`
    fn covered_indices(&self, cidr: &Cidr4) -> Result<(usize, usize), Error> {
        if cidr.prefix_len() > self.subnet_prefix_len || !self.parent.contains(cidr) {
            return Err(self.placement_error(cidr));
        }
        let offset = u64::from(ip_to_u32(cidr.addr()) - ip_to_u32(self.parent.addr()));
        let subnet_host_bits = 32 - self.subnet_prefix_len;
        // Both values are below total_subnets
        #[allow(clippy::cast_possible_truncation)]
        let first = (offset >> subnet_host_bits) as usize;
        let count = 1 << (self.subnet_prefix_len - cidr.prefix_len());
        Ok((first, count))
    }

    fn placement_error(&self, cidr: &Cidr4) -> Error {
        if self.parent.contains(cidr) {
            Error::Misaligned {
                subnet: *cidr,
                subnet_prefix_len: self.subnet_prefix_len,
            }
        } else {
            Error::OutsideParent {
                subnet: *cidr,
                parent: self.parent,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn cidr(s: &str) -> Cidr4 {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_allocation() {
        let sna = SubnetAllocator::new("10.1.0.0/16", 8, &[]).unwrap();
        assert_eq!(sna.subnet_prefix_len(), 24);
        assert_eq!(sna.host_bits(), 8);
        assert_eq!(sna.total_subnets(), 256);
        assert_eq!(sna.get_network().unwrap(), cidr("10.1.0.0/24"));
        assert_eq!(sna.get_network().unwrap(), cidr("10.1.1.0/24"));
        assert_eq!(sna.allocated_count(), 2);
        assert_eq!(sna.free_count(), 254);
    }

    #[test]
    fn test_with_subnet_prefix_len() {
        let sna = SubnetAllocator::with_subnet_prefix_len("10.1.0.0/16", 24, &[]).unwrap();
        assert_eq!(sna.host_bits(), 8);
        assert_eq!(sna.get_network().unwrap(), cidr("10.1.0.0/24"));
        assert_eq!(
            SubnetAllocator::with_subnet_prefix_len("10.1.0.0/16", 33, &[]).unwrap_err(),
            Error::InvalidPrefixLength(33)
        );
    }

    #[test]
    fn test_host_bits_from_parent() {
        let parent = cidr("10.1.0.0/16");
        let sna = SubnetAllocator::from_parts(parent, parent.host_bits() - 8, &[]).unwrap();
        assert_eq!(sna.subnet_prefix_len(), 24);
        let state = sna.snapshot();
        assert_eq!(state.host_bits, sna.host_bits());
        let restored = SubnetAllocator::from_state(&state).unwrap();
        assert_eq!(restored.host_bits(), 8);
        let err = SubnetAllocator::from_parts(parent, parent.host_bits() + 1, &[]).unwrap_err();
        assert_eq!(err, Error::SubnetTooLarge { parent, host_bits: 17 });
    }

    #[test]
    fn test_invalid_parent() {
        let err = SubnetAllocator::new("10.1.0.0", 8, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        let err = SubnetAllocator::new("10.1.2.0/16", 8, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DirtyMask);
    }

    #[test]
    fn test_subnet_too_large() {
        let err = SubnetAllocator::new("10.1.0.0/16", 17, &[]).unwrap_err();
        assert!(matches!(err, Error::SubnetTooLarge { host_bits: 17, .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(SubnetAllocator::new("10.1.0.0/16", 40, &[]).is_err());
    }

    #[test]
    fn test_whole_parent_as_one_subnet() {
        let sna = SubnetAllocator::new("10.1.0.0/16", 16, &[]).unwrap();
        assert_eq!(sna.total_subnets(), 1);
        assert_eq!(sna.get_network().unwrap(), cidr("10.1.0.0/16"));
        assert_eq!(sna.get_network().unwrap_err(), Error::Exhausted(cidr("10.1.0.0/16")));
    }

    #[test]
    fn test_host_routes() {
        let sna = SubnetAllocator::new("192.168.1.252/30", 0, &[]).unwrap();
        let got = (0..4).map(|_| sna.get_network().unwrap()).collect::<Vec<_>>();
        assert_eq!(
            got,
            vec![
                cidr("192.168.1.252/32"),
                cidr("192.168.1.253/32"),
                cidr("192.168.1.254/32"),
                cidr("192.168.1.255/32"),
            ]
        );
        assert_eq!(sna.get_network().unwrap_err().kind(), ErrorKind::Exhaustion);
    }

    #[test]
    fn test_whole_address_space() {
        let sna = SubnetAllocator::new("0.0.0.0/0", 32, &[]).unwrap();
        assert_eq!(sna.get_network().unwrap(), cidr("0.0.0.0/0"));
        let sna = SubnetAllocator::new("0.0.0.0/0", 24, &[]).unwrap();
        assert_eq!(sna.total_subnets(), 256);
        assert_eq!(sna.get_network().unwrap(), cidr("0.0.0.0/8"));
        let last = cidr("255.0.0.0/8");
        sna.mark_allocated(&last).unwrap();
        assert!(sna.is_allocated(&last));
    }

    #[test]
    fn test_too_many_subnets() {
        let err = SubnetAllocator::new("0.0.0.0/0", 0, &[]).unwrap_err();
        assert!(matches!(err, Error::TooManySubnets { .. }));
        assert!(SubnetAllocator::new("0.0.0.0/0", 8, &[]).is_ok());
    }

    #[test]
    fn test_exclusions() {
        let sna =
            SubnetAllocator::new("10.1.0.0/16", 8, &["10.1.0.0/24", "10.1.2.0/23"]).unwrap();
        assert_eq!(sna.excluded_count(), 3);
        assert_eq!(
            sna.excluded_networks(),
            vec![cidr("10.1.0.0/24"), cidr("10.1.2.0/24"), cidr("10.1.3.0/24")]
        );
        assert_eq!(sna.get_network().unwrap(), cidr("10.1.1.0/24"));
        assert_eq!(sna.get_network().unwrap(), cidr("10.1.4.0/24"));
        assert_eq!(
            sna.release_network(&cidr("10.1.2.0/24")),
            Err(Error::Excluded(cidr("10.1.2.0/24")))
        );
        assert_eq!(
            sna.mark_allocated(&cidr("10.1.3.0/24")),
            Err(Error::Excluded(cidr("10.1.3.0/24")))
        );
    }

    #[test]
    fn test_overlapping_exclusions() {
        let sna = SubnetAllocator::new(
            "10.1.0.0/16",
            8,
            &["10.1.0.0/22", "10.1.1.0/24", "10.1.1.0/24"],
        )
        .unwrap();
        assert_eq!(sna.excluded_count(), 4);
        assert_eq!(sna.free_count(), 252);
    }

    #[test]
    fn test_bad_exclusions() {
        let err = SubnetAllocator::new("10.1.0.0/16", 8, &["10.2.0.0/24"]).unwrap_err();
        assert!(matches!(err, Error::OutsideParent { .. }));
        let err = SubnetAllocator::new("10.1.0.0/16", 8, &["10.0.0.0/8"]).unwrap_err();
        assert!(matches!(err, Error::OutsideParent { .. }));
        let err = SubnetAllocator::new("10.1.0.0/16", 8, &["10.1.0.0/25"]).unwrap_err();
        assert!(matches!(err, Error::Misaligned { .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let err = SubnetAllocator::new("10.1.0.0/16", 8, &["10.1.0.1/24"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DirtyMask);
        let err = SubnetAllocator::new("10.1.0.0/16", 8, &["junk"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_mark_allocated() {
        let sna = SubnetAllocator::new("10.1.0.0/16", 8, &[]).unwrap();
        sna.mark_allocated(&cidr("10.1.0.0/24")).unwrap();
        sna.mark_allocated(&cidr("10.1.2.0/24")).unwrap();
        assert_eq!(
            sna.mark_allocated(&cidr("10.1.2.0/24")),
            Err(Error::AlreadyAllocated(cidr("10.1.2.0/24")))
        );
        assert_eq!(sna.get_network().unwrap(), cidr("10.1.1.0/24"));
        assert_eq!(sna.get_network().unwrap(), cidr("10.1.3.0/24"));
        assert_eq!(
            sna.allocated_networks(),
            vec![
                cidr("10.1.0.0/24"),
                cidr("10.1.1.0/24"),
                cidr("10.1.2.0/24"),
                cidr("10.1.3.0/24"),
            ]
        );
    }

    #[test]
    fn test_mark_allocated_placement() {
        let sna = SubnetAllocator::new("10.1.0.0/16", 8, &[]).unwrap();
        let err = sna.mark_allocated(&cidr("10.2.0.0/24")).unwrap_err();
        assert!(matches!(err, Error::OutsideParent { .. }));
        let err = sna.mark_allocated(&cidr("10.1.0.0/23")).unwrap_err();
        assert!(matches!(err, Error::Misaligned { .. }));
        let err = sna.mark_allocated(&cidr("10.1.0.128/25")).unwrap_err();
        assert!(matches!(err, Error::Misaligned { .. }));
        assert_eq!(sna.allocated_count(), 0);
    }

    #[test]
    fn test_release() {
        let sna = SubnetAllocator::new("10.1.0.0/16", 8, &[]).unwrap();
        let first = sna.get_network().unwrap();
        let second = sna.get_network().unwrap();
        sna.release_network(&first).unwrap();
        assert!(!sna.is_allocated(&first));
        assert!(sna.is_allocated(&second));
        assert_eq!(sna.release_network(&first), Err(Error::NotAllocated(first)));
        // The lowest free subnet is handed out again
        assert_eq!(sna.get_network().unwrap(), first);
        assert_eq!(
            sna.release_network(&cidr("10.1.9.0/24")),
            Err(Error::NotAllocated(cidr("10.1.9.0/24")))
        );
        assert!(matches!(
            sna.release_network(&cidr("10.9.0.0/24")),
            Err(Error::OutsideParent { .. })
        ));
    }

    #[test]
    fn test_failures_leave_state_alone() {
        let sna = SubnetAllocator::new("10.1.0.0/30", 1, &["10.1.0.0/31"]).unwrap();
        let only = sna.get_network().unwrap();
        let before = sna.snapshot();
        assert!(sna.get_network().is_err());
        assert!(sna.mark_allocated(&only).is_err());
        assert!(sna.mark_allocated(&cidr("10.1.0.0/31")).is_err());
        assert!(sna.release_network(&cidr("10.1.0.0/31")).is_err());
        assert!(sna.release_network(&cidr("10.1.0.0/32")).is_err());
        assert_eq!(sna.snapshot(), before);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let sna = SubnetAllocator::new("172.16.0.0/12", 12, &["172.16.0.0/19"]).unwrap();
        for _ in 0..5 {
            sna.get_network().unwrap();
        }
        sna.release_network(&cidr("172.16.64.0/20")).unwrap();
        let state = sna.snapshot();
        assert_eq!(state.host_bits, 12);
        assert_eq!(state.excluded, vec![cidr("172.16.0.0/20"), cidr("172.16.16.0/20")]);
        assert_eq!(state.allocated.len(), 4);
        let restored = SubnetAllocator::from_state(&state).unwrap();
        assert_eq!(restored.snapshot(), state);
        assert_eq!(restored.get_network().unwrap(), sna.get_network().unwrap());
    }
}
