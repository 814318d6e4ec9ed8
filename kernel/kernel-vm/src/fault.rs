//! # TLB Fault Handling
//!
//! Entry point for the trap layer when the TLB misses (or refuses a
//! store). Per fault:
//!
//! 1. No current address space → the access cannot be legal.
//! 2. A read-only fault (store through a clean entry) is final: this
//!    kernel has no copy-on-write, read-only pages genuinely are
//!    read-only.
//! 3. An unknown fault code is a malformed request.
//! 4. If the page table already holds a translation, the TLB simply lost
//!    it: refill and return.
//! 5. Otherwise the miss is demand-pageable only if the address lies in a
//!    region whose permissions allow the access: allocate a frame, zero
//!    it, install the entry, refill.
//!
//! Between allocating a frame and installing it the frame is owned by a
//! [`FrameGuard`], which hands it back to the allocator on any
//! non-success exit, so a failed install never leaks the frame.

use crate::address_space::AddressSpace;
use crate::region::AccessKind;
use crate::tlb::{self, EntryHi, Tlb};
use crate::{FrameAlloc, KernelWindow, VmError};
use kernel_addresses::VirtualAddress;
use kernel_spl::Spl;
use log::trace;

/// Fault code: load from an unmapped page.
pub const FAULT_READ: u32 = 0;

/// Fault code: store to an unmapped page.
pub const FAULT_WRITE: u32 = 1;

/// Fault code: store through a mapping without the write enable.
pub const FAULT_READONLY: u32 = 2;

/// Service a TLB fault at `fault_address`.
///
/// `current` is the faulting process's address space, or `None` when
/// there is no user process behind the trap (a kernel-thread fault).
/// `fault_type` is the raw code from the exception path.
///
/// On success a translation for the faulting page has been written to the
/// TLB and the faulting instruction can be restarted. On failure the trap
/// layer is expected to kill the faulting process; nothing is terminated
/// here.
///
/// # Errors
///
/// - [`VmError::BadAddress`] — no current space, store to a read-only
///   mapping, no regions defined, or the address lies outside every
///   region.
/// - [`VmError::InvalidArgument`] — unknown `fault_type`.
/// - [`VmError::NotPermitted`] — the address lies in a region, but the
///   region forbids this kind of access.
/// - [`VmError::OutOfMemory`] — no frame (or page-table storage) was
///   available; nothing is installed or leaked.
pub fn vm_fault<A, W, T, S>(
    alloc: &mut A,
    window: &W,
    tlb: &mut T,
    spl: &mut S,
    current: Option<&mut AddressSpace>,
    fault_type: u32,
    fault_address: VirtualAddress,
) -> Result<(), VmError>
where
    A: FrameAlloc,
    W: KernelWindow,
    T: Tlb,
    S: Spl,
{
    let Some(space) = current else {
        return Err(VmError::BadAddress);
    };

    let access = match fault_type {
        FAULT_READONLY => return Err(VmError::BadAddress),
        FAULT_READ => AccessKind::Read,
        FAULT_WRITE => AccessKind::Write,
        _ => return Err(VmError::InvalidArgument),
    };

    if space.regions().is_empty() {
        return Err(VmError::BadAddress);
    }

    let hi = EntryHi::for_page(fault_address);

    // Hit: the translation exists, the TLB merely lost it.
    if let Some(entry) = space.directory().entry(fault_address) {
        tlb::refill(tlb, spl, hi, entry);
        return Ok(());
    }

    // Miss: demand-pageable only inside a region permitting the access.
    let region = space.regions().find(fault_address).ok_or(VmError::BadAddress)?;
    if !region.allows(access) {
        return Err(VmError::NotPermitted);
    }

    let frame = FrameGuard::alloc(alloc).ok_or(VmError::OutOfMemory)?;
    // SAFETY: the guard's page is a live, exclusively owned frame.
    unsafe { window.frame_mut(frame.page()) }.fill(0);

    let entry = space.insert_pte(fault_address, frame.page().to_physical())?;
    frame.installed();
    trace!("vm: demand-mapped {} -> {}", hi.page(), entry.frame());

    tlb::refill(tlb, spl, hi, entry);
    Ok(())
}

/// Scoped ownership of a freshly allocated frame.
///
/// The frame is returned to the allocator when the guard drops, unless
/// [`installed`](Self::installed) transferred ownership to a page table.
struct FrameGuard<'a, A: FrameAlloc> {
    alloc: &'a mut A,
    page: VirtualAddress,
}

impl<'a, A: FrameAlloc> FrameGuard<'a, A> {
    /// Allocate one frame; `None` on exhaustion.
    fn alloc(alloc: &'a mut A) -> Option<Self> {
        let page = alloc.alloc_kpage()?;
        debug_assert!(page.is_page_aligned());
        debug_assert!(page.in_kseg0());
        Some(Self { alloc, page })
    }

    /// Kernel-window address of the held frame.
    const fn page(&self) -> VirtualAddress {
        self.page
    }

    /// The frame is now owned by a page-table slot; do not free it.
    fn installed(self) {
        core::mem::forget(self);
    }
}

impl<A: FrameAlloc> Drop for FrameGuard<'_, A> {
    fn drop(&mut self) {
        self.alloc.free_kpage(self.page);
    }
}
