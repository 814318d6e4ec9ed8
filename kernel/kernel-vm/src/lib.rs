//! # Per-Process Virtual Memory
//!
//! The machine-independent virtual-memory core: per-process
//! [address spaces](AddressSpace) built from permissioned regions and a
//! two-level page table, plus the [fault handler](vm_fault) that services
//! misses of the software-managed TLB.
//!
//! ## Virtual Address → Physical Frame Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒21 | 20‒12 | 11‒0   |
//! |   PD  |   PT  | Offset |
//! ```
//!
//! The upper 11 bits index the **page directory** (2048 slots, allocated
//! eagerly with the address space); the middle 9 bits index a **page
//! table** (512 slots, allocated lazily on first use); the low 12 bits
//! select the byte inside the 4 KiB frame.
//!
//! ```text
//!  PD  →  PT  →  Physical Frame
//!  │       │
//!  │       └───► PTE (packed EntryLo word: PFN | DIRTY | VALID)
//!  └───────────► lazily allocated second-level table
//! ```
//!
//! There is no hardware page-table walker: on a TLB miss the trap layer
//! calls [`vm_fault`], which walks these tables in software and writes the
//! translation into a random TLB slot. The `DIRTY` bit of an entry is a
//! software-managed *write enable*, not a modified indicator.
//!
//! ## Ownership
//!
//! An address space owns its directory; the directory owns each allocated
//! second-level table; each installed slot owns the physical frame it
//! names. Frames come from the [`FrameAlloc`] seam as kernel-window
//! addresses and are handed back through it on
//! [`destroy`](AddressSpace::destroy). No frame is ever referenced from
//! two slots.
//!
//! ## Concurrency
//!
//! Uniprocessor only. An address space is touched by exactly one thread
//! (its own, or a fault running on that thread's kernel stack), so the
//! structures carry no locks. The only masked section is the TLB write
//! itself. Multiprocessor TLB shootdown is unsupported and
//! [panics](tlb::shootdown).

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod address_space;
pub mod fault;
pub mod page_table;
pub mod region;
pub mod tlb;

pub use crate::address_space::AddressSpace;
pub use crate::fault::{FAULT_READ, FAULT_READONLY, FAULT_WRITE, vm_fault};
pub use crate::region::{AccessKind, Permissions, Region};
pub use crate::tlb::{EntryHi, EntryLo, Tlb, TlbShootdown};

/// Re-export the address and layout types this crate speaks.
pub use kernel_addresses as addresses;

use kernel_addresses::{PAGE_SIZE, VirtualAddress};

/// One page worth of bytes, as seen through the kernel window.
pub type PageFrame = [u8; PAGE_SIZE as usize];

/// A status code of the virtual-memory subsystem.
///
/// Every fallible operation returns one of these; the trap layer converts
/// a non-success result from [`vm_fault`] into a process-termination
/// signal. The core itself never terminates processes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmError {
    /// A frame or kernel-heap allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// Malformed request: an overflowing or overlapping region, an
    /// unbalanced load transition, or an unknown fault code.
    #[error("invalid argument")]
    InvalidArgument,

    /// Address outside any defined region, access to a read-only
    /// mapping, or no address space to serve the fault.
    #[error("bad address")]
    BadAddress,

    /// The address lies in a region, but the region's permissions do not
    /// allow the attempted access.
    #[error("operation not permitted")]
    NotPermitted,
}

/// Physical frame allocator seam.
///
/// Frames are handed out as their **kernel-window** virtual address (the
/// window direct-maps all physical memory), page-aligned. The core
/// converts to the physical form before storing a frame in a page-table
/// entry, and reconstructs the window address to free it.
///
/// Returns `None` on exhaustion; the implementation may block the calling
/// thread while it satisfies the request.
pub trait FrameAlloc {
    /// Allocate one frame; returns its page-aligned kernel-window address.
    fn alloc_kpage(&mut self) -> Option<VirtualAddress>;

    /// Return a frame previously obtained from [`alloc_kpage`](Self::alloc_kpage).
    fn free_kpage(&mut self, page: VirtualAddress);
}

/// Access to frame memory through the direct-mapped kernel window.
///
/// On the real machine the window is plain address arithmetic and the
/// returned reference points into physical memory; in tests it is backed
/// by host allocations.
pub trait KernelWindow {
    /// Borrow the page at kernel-window address `page` as raw bytes.
    ///
    /// # Safety
    ///
    /// `page` must be a page-aligned kernel-window address of a live
    /// frame, and the caller must ensure the frame is not aliased for the
    /// lifetime of the returned reference.
    unsafe fn frame_mut<'a>(&self, page: VirtualAddress) -> &'a mut PageFrame;
}

/// One-time bring-up hook for the VM subsystem, called during boot before
/// the first address space is created.
///
/// All state in this design is per-address-space, so there is nothing
/// global to initialize.
pub fn bootstrap() {
    log::info!("vm: two-level page tables, {PAGE_SIZE}-byte pages");
}
