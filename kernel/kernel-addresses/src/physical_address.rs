use crate::layout::{KSEG0_BASE, KSEG0_SIZE};
use crate::{PAGE_FRAME, VirtualAddress};
use core::fmt;

/// Physical memory address (machine bus address).
///
/// Newtype over `u32` to prevent mixing with virtual addresses. No
/// alignment guarantees by itself; page-table entries store only the
/// [`frame`](Self::frame) part.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u32);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The frame base of this address (low bits cleared).
    #[inline]
    #[must_use]
    pub const fn frame(self) -> Self {
        Self(self.0 & PAGE_FRAME)
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & !PAGE_FRAME == 0
    }

    /// The kernel-window (kseg0) virtual address direct-mapping this
    /// physical address.
    ///
    /// Debug-asserts that the address is reachable through the window.
    #[inline]
    #[must_use]
    pub const fn to_kseg0(self) -> VirtualAddress {
        debug_assert!(self.0 < KSEG0_SIZE);
        VirtualAddress::new(self.0 + KSEG0_BASE)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:08x})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<u32> for PhysicalAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}
