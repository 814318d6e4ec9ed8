use crate::layout::{KSEG0_BASE, KSEG1_BASE};
use crate::{PAGE_FRAME, PhysicalAddress};
use core::fmt;
use core::ops::Add;

/// Virtual memory address.
///
/// A thin wrapper around `u32` that denotes **virtual** addresses. It does
/// not validate anything at construction; it only carries the *kind* of
/// address at the type level so virtual and physical values cannot be
/// accidentally mixed.
///
/// ### Semantics
/// - [`page_base`](Self::page_base) / [`page_offset`](Self::page_offset)
///   split the address at page granularity.
/// - [`to_physical`](Self::to_physical) converts a kernel-window (kseg0)
///   address back to the physical frame it direct-maps.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The base of the page containing this address.
    #[inline]
    #[must_use]
    pub const fn page_base(self) -> Self {
        Self(self.0 & PAGE_FRAME)
    }

    /// The in-page offset of this address.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u32 {
        self.0 & !PAGE_FRAME
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// Whether this address lies in userspace (below the kernel boundary).
    #[inline]
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0 < KSEG0_BASE
    }

    /// Whether this address lies in the direct-mapped kernel window.
    #[inline]
    #[must_use]
    pub const fn in_kseg0(self) -> bool {
        self.0 >= KSEG0_BASE && self.0 < KSEG1_BASE
    }

    /// Convert a kernel-window address to the physical address it maps.
    ///
    /// The window is a fixed offset, so this is pure arithmetic.
    /// Debug-asserts that the address actually lies in the window.
    #[inline]
    #[must_use]
    pub const fn to_physical(self) -> PhysicalAddress {
        debug_assert!(self.in_kseg0());
        PhysicalAddress::new(self.0 - KSEG0_BASE)
    }

    /// Add a byte offset, reporting wraparound instead of panicking.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08x})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl Add<u32> for VirtualAddress {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}
