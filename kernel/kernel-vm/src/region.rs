//! # User Address-Space Regions
//!
//! A region is a half-open, page-aligned interval `[base, base + size)` of
//! user virtual addresses with a fixed permission set — the unit at which
//! the executable loader describes segments and the fault handler decides
//! whether a miss is demand-pageable.
//!
//! Regions within one address space are disjoint. They are kept in a
//! vector ordered by base; with a handful of regions per process, the
//! linear overlap and containment scans are not worth improving on.
//!
//! ## The load transition
//!
//! Segments are copied into the address space before the program runs,
//! which means writing to pages that may be read-only at run time. The
//! loader brackets the copy with [`prepare_load`](crate::AddressSpace::prepare_load)
//! (every region's permissions are saved and widened to writable) and
//! [`complete_load`](crate::AddressSpace::complete_load) (saved permissions
//! are restored and already-installed entries lose their write enable).
//! [`Region::saved_permissions`] is the shadow copy carrying the original
//! set across that window.

use crate::VmError;
use alloc::vec::Vec;
use kernel_addresses::layout::KSEG0_BASE;
use kernel_addresses::{PAGE_FRAME, PAGE_SIZE, VirtualAddress};

bitflags::bitflags! {
    /// Region access permissions.
    ///
    /// Numeric values equal the ELF segment flags (`PF_R`/`PF_W`/`PF_X`),
    /// so the loader can pass program-header flags straight through.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Permissions: u32 {
        /// Instructions may be fetched from the region.
        const EXECUTE = 0x1;
        /// The region may be written.
        const WRITE = 0x2;
        /// The region may be read.
        const READ = 0x4;
    }
}

/// The kind of access a fault attempted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessKind {
    /// Load (or instruction fetch, which the hardware reports as a load).
    Read,
    /// Store.
    Write,
}

/// One contiguous, page-aligned interval of user addresses.
#[derive(Debug, Clone)]
pub struct Region {
    base: VirtualAddress,
    size: u32,
    permissions: Permissions,
    saved_permissions: Permissions,
}

impl Region {
    /// First address of the region; page-aligned.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    /// Size in bytes; a multiple of the page size, possibly zero.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// First address past the region. Cannot overflow: `define` bounds
    /// every region by the kernel base.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.base.as_u32() + self.size
    }

    /// Current permission set.
    #[inline]
    #[must_use]
    pub const fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Permission set saved by `prepare_load`, restored by
    /// `complete_load`.
    #[inline]
    #[must_use]
    pub(crate) const fn saved_permissions(&self) -> Permissions {
        self.saved_permissions
    }

    /// Whether `va` lies inside the region.
    #[inline]
    #[must_use]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        self.base <= va && va.as_u32() < self.end()
    }

    /// Whether the current permissions allow `access`.
    #[must_use]
    pub fn allows(&self, access: AccessKind) -> bool {
        match access {
            AccessKind::Read => self.permissions.contains(Permissions::READ),
            AccessKind::Write => self.permissions.contains(Permissions::WRITE),
        }
    }
}

/// The defined regions of one address space, ordered by base address.
#[derive(Debug, Default)]
pub struct RegionSet {
    regions: Vec<Region>,
}

impl RegionSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// Define a new region covering `[vaddr, vaddr + size)`.
    ///
    /// The base is aligned down and the size up to page granularity, so
    /// the defined region covers at least the requested bytes. A request
    /// that aligns to size zero is legal and vacuous: it intersects
    /// nothing and will never contain an address, but it is recorded.
    ///
    /// # Errors
    ///
    /// - [`VmError::InvalidArgument`] if `vaddr + size` overflows, or the
    ///   aligned interval intersects an existing region.
    /// - [`VmError::BadAddress`] if the aligned interval reaches past the
    ///   end of userspace.
    /// - [`VmError::OutOfMemory`] if there is no room for the region
    ///   record; the set is unchanged.
    pub fn define(
        &mut self,
        vaddr: VirtualAddress,
        size: u32,
        permissions: Permissions,
    ) -> Result<(), VmError> {
        // Align the base down, growing the size to keep covering the
        // requested bytes, then round the size up to whole pages.
        let base = vaddr.page_base();
        let size = size
            .checked_add(vaddr.page_offset())
            .and_then(|s| s.checked_add(PAGE_SIZE - 1))
            .ok_or(VmError::InvalidArgument)?
            & PAGE_FRAME;

        let end = base
            .as_u32()
            .checked_add(size)
            .ok_or(VmError::InvalidArgument)?;
        if end > KSEG0_BASE {
            return Err(VmError::BadAddress);
        }

        let intersects = self.regions.iter().any(|r| {
            let lo = base.as_u32().max(r.base.as_u32());
            let hi = end.min(r.end());
            lo < hi
        });
        if intersects {
            return Err(VmError::InvalidArgument);
        }

        self.regions
            .try_reserve(1)
            .map_err(|_| VmError::OutOfMemory)?;
        let idx = self.regions.partition_point(|r| r.base < base);
        self.regions.insert(
            idx,
            Region {
                base,
                size,
                permissions,
                saved_permissions: permissions,
            },
        );
        Ok(())
    }

    /// The region containing `va`, if any.
    #[must_use]
    pub fn find(&self, va: VirtualAddress) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(va))
    }

    /// Save every region's permissions and widen them to writable, so the
    /// loader can copy into otherwise read-only segments.
    pub(crate) fn save_and_widen(&mut self) {
        for r in &mut self.regions {
            r.saved_permissions = r.permissions;
            r.permissions.insert(Permissions::WRITE);
        }
    }

    /// Restore the write bit of every region from its saved permissions.
    /// Only the write bit moves; the other bits were never touched.
    pub(crate) fn restore_write(&mut self) {
        for r in &mut self.regions {
            r.permissions.set(
                Permissions::WRITE,
                r.saved_permissions.contains(Permissions::WRITE),
            );
        }
    }
}
