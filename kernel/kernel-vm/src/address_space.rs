//! # Address Space
//!
//! The per-process virtual-memory object: a set of permissioned
//! [regions](crate::region) plus a [two-level page table](crate::page_table),
//! with the lifecycle hooks the process layer and the executable loader
//! drive.
//!
//! ## Highlights
//!
//! - [`AddressSpace::new`] / [`AddressSpace::destroy`] bracket the life of
//!   a process image; `destroy` returns every owned frame to the
//!   allocator.
//! - [`AddressSpace::define_region`] and [`AddressSpace::define_stack`]
//!   are called by the loader while the image is assembled.
//! - [`AddressSpace::prepare_load`] / [`AddressSpace::complete_load`]
//!   bracket segment copy-in; see the [region module](crate::region) for
//!   the permission-widening protocol.
//! - [`AddressSpace::activate`] runs when the owning process is
//!   scheduled: it flushes the TLB, so no entry of a previously running
//!   space can match afterwards.
//!
//! An address space is only ever touched by its own process's thread, or
//! by the fault handler on that thread's kernel stack, so there is no
//! locking here.

use crate::page_table::{PageDirectory, PteSlot};
use crate::region::{Permissions, RegionSet};
use crate::tlb::{self, EntryLo, Tlb};
use crate::{FrameAlloc, VmError};
use kernel_addresses::layout::{USER_STACK_SIZE, USER_STACK_TOP};
use kernel_addresses::{PhysicalAddress, VirtualAddress};
use kernel_spl::Spl;

/// A per-process virtual address space.
pub struct AddressSpace {
    regions: RegionSet,
    directory: PageDirectory,
    loading: bool,
}

impl AddressSpace {
    /// Create an empty address space: no regions, a directory with every
    /// slot empty.
    ///
    /// # Errors
    ///
    /// [`VmError::OutOfMemory`] if the directory cannot be allocated;
    /// nothing is left behind in that case.
    pub fn new() -> Result<Self, VmError> {
        Ok(Self {
            regions: RegionSet::new(),
            directory: PageDirectory::try_new()?,
            loading: false,
        })
    }

    /// Clone for `fork`.
    ///
    /// Currently a stub: returns a fresh empty space without duplicating
    /// regions or frames. Real fork semantics (walk the regions, copy or
    /// COW-share every installed page) are an open gap; see DESIGN.md.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn try_clone(&self) -> Result<Self, VmError> {
        Self::new()
    }

    /// Tear the space down, returning every frame installed in the page
    /// table to `alloc`. Region and table storage is dropped afterwards.
    pub fn destroy(mut self, alloc: &mut impl FrameAlloc) {
        self.directory.release_frames(alloc);
    }

    /// Make this the running address space.
    ///
    /// Invoked when the owning process is scheduled and at the end of
    /// [`complete_load`](Self::complete_load). Entries are not tagged
    /// with address-space identifiers, so this flushes the whole TLB;
    /// afterwards no translation from a prior space can match.
    pub fn activate(&self, tlb: &mut impl Tlb, spl: &mut impl Spl) {
        tlb::flush(tlb, spl);
    }

    /// Counterpart of [`activate`](Self::activate); nothing to do in this
    /// design.
    pub fn deactivate(&self) {}

    /// Define a region covering `[vaddr, vaddr + size)` with the given
    /// permissions. See [`RegionSet::define`] for alignment and the error
    /// contract.
    ///
    /// # Errors
    ///
    /// As [`RegionSet::define`].
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: u32,
        permissions: Permissions,
    ) -> Result<(), VmError> {
        self.regions.define(vaddr, size, permissions)
    }

    /// Define the user stack region and return the initial stack pointer.
    ///
    /// The stack is readable and writable, not executable, and grows down
    /// from the top of userspace.
    ///
    /// # Errors
    ///
    /// As [`define_region`](Self::define_region).
    pub fn define_stack(&mut self) -> Result<VirtualAddress, VmError> {
        self.define_region(
            VirtualAddress::new(USER_STACK_TOP - USER_STACK_SIZE),
            USER_STACK_SIZE,
            Permissions::READ | Permissions::WRITE,
        )?;
        Ok(VirtualAddress::new(USER_STACK_TOP))
    }

    /// Enter the load transition: save every region's permissions and
    /// widen them to writable so segment contents can be copied in.
    ///
    /// # Errors
    ///
    /// [`VmError::InvalidArgument`] if a load is already in progress —
    /// nesting would silently lose the saved permissions.
    pub fn prepare_load(&mut self) -> Result<(), VmError> {
        if self.loading {
            return Err(VmError::InvalidArgument);
        }
        self.regions.save_and_widen();
        self.loading = true;
        Ok(())
    }

    /// Leave the load transition.
    ///
    /// Every entry installed for a region that was read-only before
    /// [`prepare_load`](Self::prepare_load) loses its write enable (and
    /// is kept valid); then the regions' saved permissions are restored
    /// and the TLB is flushed via [`activate`](Self::activate), dropping
    /// any stale writable translations.
    ///
    /// # Errors
    ///
    /// [`VmError::InvalidArgument`] if no load is in progress.
    pub fn complete_load(&mut self, tlb: &mut impl Tlb, spl: &mut impl Spl) -> Result<(), VmError> {
        if !self.loading {
            return Err(VmError::InvalidArgument);
        }

        for (page, slot) in self.directory.entries_mut() {
            let region = self.regions.find(page);
            debug_assert!(region.is_some(), "installed page {page} outside any region");
            let Some(region) = region else { continue };

            if !region.saved_permissions().contains(Permissions::WRITE)
                && let Some(entry) = slot.entry()
            {
                *slot = PteSlot::from_entry(entry.with_dirty(false).with_valid(true));
            }
        }

        self.regions.restore_write();
        self.loading = false;
        self.activate(tlb, spl);
        Ok(())
    }

    /// The defined regions.
    #[inline]
    #[must_use]
    pub const fn regions(&self) -> &RegionSet {
        &self.regions
    }

    /// The page directory.
    #[inline]
    #[must_use]
    pub const fn directory(&self) -> &PageDirectory {
        &self.directory
    }

    /// Install a translation for the page containing `va`, deciding the
    /// write enable from the owning region's permissions at install time.
    ///
    /// The fault handler only calls this for addresses it has already
    /// proven to lie in a region; a miss here is a logic error, reported
    /// as `BadAddress` rather than unwinding the kernel.
    pub(crate) fn insert_pte(
        &mut self,
        va: VirtualAddress,
        frame: PhysicalAddress,
    ) -> Result<EntryLo, VmError> {
        let Some(region) = self.regions.find(va) else {
            debug_assert!(false, "installing a translation outside any region");
            return Err(VmError::BadAddress);
        };
        let writable = region.permissions().contains(Permissions::WRITE);
        self.directory.insert(va, frame, writable)
    }
}
