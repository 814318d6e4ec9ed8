//! # Two-Level Page Table
//!
//! Sparse mapping from virtual page number to physical frame. The
//! directory (2048 slots, VA bits `[31:21]`) exists for the whole life of
//! the address space; each second-level table (512 slots, VA bits
//! `[20:12]`) is allocated the first time an entry in it is installed.
//!
//! A slot is either the distinguished [`PteSlot::UNALLOCATED`] sentinel or
//! a packed [`EntryLo`] word. The sentinel must be tested explicitly — an
//! all-zero word is *not* unallocated, it is a legal (if useless) entry.
//!
//! ## Invariants
//!
//! - An installed slot names a frame obtained from the frame allocator
//!   and owned by this table; no frame appears in two slots.
//! - Installed entries always have `VALID` set and keep the eight unused
//!   low bits clear, so no installed word equals the all-ones sentinel.

use crate::tlb::EntryLo;
use crate::{FrameAlloc, VmError};
use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_addresses::{PAGE_SHIFT, PhysicalAddress, VirtualAddress};

/// Number of slots in the page directory (VA bits `[31:21]`).
pub const NUM_PD_ENTRIES: usize = 2048;

/// Number of slots in one second-level table (VA bits `[20:12]`).
pub const NUM_PT_ENTRIES: usize = 512;

/// Number of VA bits below a directory slot: one second-level table maps
/// 2 MiB of address space.
const PD_SHIFT: u32 = 21;

/// Index into the page directory (derived from VA bits `[31:21]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PdIndex(u16);

impl PdIndex {
    /// Extract the directory index of `va`.
    #[inline]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new((va.as_u32() >> PD_SHIFT) as u16)
    }

    /// Construct from a raw index; debug-asserts the range.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < NUM_PD_ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Index into a second-level table (derived from VA bits `[20:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PtIndex(u16);

impl PtIndex {
    /// Extract the table index of `va`.
    #[inline]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(((va.as_u32() >> PAGE_SHIFT) & 0x1ff) as u16)
    }

    /// Construct from a raw index; debug-asserts the range.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < NUM_PT_ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Split a virtual address into its directory and table indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (PdIndex, PtIndex) {
    (PdIndex::from(va), PtIndex::from(va))
}

/// Recompose the page base mapped by a (directory, table) slot pair.
const fn page_base_of(pd: usize, pt: usize) -> VirtualAddress {
    VirtualAddress::new(((pd as u32) << PD_SHIFT) | ((pt as u32) << PAGE_SHIFT))
}

/// One second-level page-table slot.
///
/// Readers must go through [`entry`](Self::entry) or
/// [`is_unallocated`](Self::is_unallocated); comparing against zero is
/// wrong, zero is a legal entry word.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PteSlot(u32);

impl PteSlot {
    /// Sentinel marking a slot with no translation. All-ones cannot
    /// collide with any installed entry (see the module invariants).
    pub const UNALLOCATED: Self = Self(u32::MAX);

    #[inline]
    #[must_use]
    pub const fn is_unallocated(self) -> bool {
        self.0 == u32::MAX
    }

    /// The stored entry, or `None` for the sentinel.
    #[inline]
    #[must_use]
    pub const fn entry(self) -> Option<EntryLo> {
        if self.is_unallocated() {
            None
        } else {
            Some(EntryLo::from_bits(self.0))
        }
    }

    #[inline]
    #[must_use]
    pub const fn from_entry(entry: EntryLo) -> Self {
        Self(entry.into_bits())
    }
}

/// A lazily allocated second-level table.
struct PageTable {
    slots: Box<[PteSlot]>,
}

impl PageTable {
    /// Allocate a table with every slot unallocated.
    fn try_new() -> Result<Self, VmError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(NUM_PT_ENTRIES)
            .map_err(|_| VmError::OutOfMemory)?;
        slots.resize(NUM_PT_ENTRIES, PteSlot::UNALLOCATED);
        Ok(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    #[inline]
    fn get(&self, i: PtIndex) -> PteSlot {
        self.slots[i.as_usize()]
    }

    #[inline]
    fn set(&mut self, i: PtIndex, slot: PteSlot) {
        self.slots[i.as_usize()] = slot;
    }
}

/// The page directory: the root of one address space's translations.
pub struct PageDirectory {
    tables: Box<[Option<PageTable>]>,
}

impl PageDirectory {
    /// Allocate an empty directory (no second-level tables yet).
    ///
    /// # Errors
    ///
    /// [`VmError::OutOfMemory`] if the kernel heap cannot back the
    /// directory; nothing is left allocated in that case.
    pub fn try_new() -> Result<Self, VmError> {
        let mut tables = Vec::new();
        tables
            .try_reserve_exact(NUM_PD_ENTRIES)
            .map_err(|_| VmError::OutOfMemory)?;
        tables.resize_with(NUM_PD_ENTRIES, || None);
        Ok(Self {
            tables: tables.into_boxed_slice(),
        })
    }

    /// The frame `va`'s page translates to, flag bits stripped, or `None`
    /// if no translation is installed.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.entry(va).map(EntryLo::frame)
    }

    /// The full stored entry word for `va`'s page; this is what a TLB
    /// refill writes.
    #[must_use]
    pub(crate) fn entry(&self, va: VirtualAddress) -> Option<EntryLo> {
        let (pd, pt) = split_indices(va);
        self.tables[pd.as_usize()].as_ref()?.get(pt).entry()
    }

    /// Install a translation for `va`'s page to `frame`, allocating the
    /// second-level table on demand. The entry is encoded valid, with the
    /// write enable set iff `writable`.
    ///
    /// Returns the encoded entry so the caller can refill the TLB without
    /// a second walk.
    ///
    /// # Errors
    ///
    /// - [`VmError::OutOfMemory`] if a second-level table was needed and
    ///   could not be allocated (no slot is modified).
    /// - [`VmError::BadAddress`] if the slot is already populated: every
    ///   page is installed at most once, a double map is a caller bug.
    pub fn insert(
        &mut self,
        va: VirtualAddress,
        frame: PhysicalAddress,
        writable: bool,
    ) -> Result<EntryLo, VmError> {
        let (pd, pt) = split_indices(va);
        let table = match &mut self.tables[pd.as_usize()] {
            Some(table) => table,
            vacant => vacant.insert(PageTable::try_new()?),
        };

        if !table.get(pt).is_unallocated() {
            return Err(VmError::BadAddress);
        }

        let entry = EntryLo::for_frame(frame, writable);
        table.set(pt, PteSlot::from_entry(entry));
        Ok(entry)
    }

    /// Release every installed frame back to the allocator and drop every
    /// second-level table. The frame's kernel-window address is
    /// reconstructed from the stored frame number.
    pub fn release_frames(&mut self, alloc: &mut impl FrameAlloc) {
        for table in &mut self.tables {
            let Some(table) = table.take() else { continue };
            for slot in &table.slots {
                if let Some(entry) = slot.entry() {
                    alloc.free_kpage(entry.frame().to_kseg0());
                }
            }
        }
    }

    /// Iterate over every installed slot together with the base of the
    /// page it maps.
    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = (VirtualAddress, &mut PteSlot)> {
        self.tables
            .iter_mut()
            .enumerate()
            .filter_map(|(pd, table)| table.as_mut().map(|t| (pd, t)))
            .flat_map(|(pd, table)| {
                table
                    .slots
                    .iter_mut()
                    .enumerate()
                    .filter(|(_, slot)| !slot.is_unallocated())
                    .map(move |(pt, slot)| (page_base_of(pd, pt), slot))
            })
    }
}
