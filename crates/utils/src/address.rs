//! Address representation and address-shape predicates.

/// A macro for implementing addresses types.
///
/// An address is just a wrapper around an `usize`, with getter and setter methods.
macro_rules! addr_impl {
    ($name:ident) => {
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
        pub struct $name(usize);

        impl $name {
            #[inline]
            pub const fn new(addr: usize) -> Self {
                Self(addr)
            }

            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            #[inline]
            pub const fn as_u64(self) -> u64 {
                self.0 as u64
            }

            /// Returns the address located `offset` bytes after this one.
            #[inline]
            pub const fn offset(self, offset: usize) -> Self {
                Self(self.0.wrapping_add(offset))
            }

            /// Aligns address downwards.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "`align` must be a power of two");
                Self::new(self.0 & !(align - 1))
            }

            /// Returns true if the address is a multiple of `align`.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "`align` must be a power of two");
                self.0 & (align - 1) == 0
            }
        }
    };
}

addr_impl!(GuestVirtAddr);
addr_impl!(GuestPhysAddr);
addr_impl!(HostPhysAddr);
addr_impl!(HostVirtAddr);

// ———————————————————————————— Address Shapes —————————————————————————————— //

/// Returns true if bits 63 down to `bits - 1` of `addr` are all equal.
///
/// `bits` is the linear-address width of the processor (48 with 4-level paging, 57 with 5-level
/// paging).
pub const fn is_address_canonical(addr: u64, bits: u32) -> bool {
    if bits == 0 || bits >= 64 {
        return true;
    }
    let shift = 64 - bits;
    (((addr << shift) as i64) >> shift) as u64 == addr
}

/// Linear addresses are valid exactly when canonical.
pub const fn is_linear_address_valid(addr: u64, bits: u32) -> bool {
    is_address_canonical(addr, bits)
}

/// Returns true if `addr` fits in a physical address of `bits` bits (MAXPHYADDR).
pub const fn is_physical_address_valid(addr: u64, bits: u32) -> bool {
    match addr.checked_shr(bits) {
        Some(upper) => upper == 0,
        None => true,
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;

    #[rustfmt::skip]
    #[test]
    fn canonical_addresses() {
        assert!(is_address_canonical(0x0000_0000_0000_0000, 48));
        assert!(is_address_canonical(0x0000_7FFF_FFFF_FFFF, 48));
        assert!(is_address_canonical(0xFFFF_8000_0000_0000, 48));
        assert!(is_address_canonical(0xFFFF_FFFF_FFFF_FFFF, 48));

        assert!(!is_address_canonical(0x0000_8000_0000_0000, 48));
        assert!(!is_address_canonical(0xFFFF_7FFF_FFFF_FFFF, 48));
        assert!(!is_address_canonical(0x0001_0000_0000_0000, 48));

        // 5-level paging widens the canonical range.
        assert!(is_address_canonical(0x0000_8000_0000_0000, 57));
        assert!(!is_address_canonical(0x0100_0000_0000_0000, 57));

        assert!(is_linear_address_valid(0xFFFF_FFFF_8000_0000, 48));
        assert!(!is_linear_address_valid(0x1234_5678_9ABC_DEF0, 48));
    }

    #[rustfmt::skip]
    #[test]
    fn physical_addresses() {
        assert!(is_physical_address_valid(0x0000_00FF_FFFF_F000, 40));
        assert!(!is_physical_address_valid(0x0000_0100_0000_0000, 40));
        assert!(is_physical_address_valid(0x0000_3FFF_FFFF_FFFF, 46));
        assert!(!is_physical_address_valid(0xFFFF_FFFF_FFFF_FFFF, 52));
        assert!(is_physical_address_valid(u64::MAX, 64));
    }

    #[test]
    fn alignment() {
        let addr = HostPhysAddr::new(0x1234);
        assert_eq!(addr.align_down(0x1000), HostPhysAddr::new(0x1000));
        assert!(!addr.is_aligned(0x10));
        assert!(addr.offset(0xC).is_aligned(0x10));
    }
}
