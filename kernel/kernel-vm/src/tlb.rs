//! # Software-Managed TLB
//!
//! Packed TLB entry words, the platform TLB seam, and the refill/flush
//! helpers used by the fault handler and by address-space activation.
//!
//! A TLB entry is the pair `(EntryHi, EntryLo)`:
//!
//! ```text
//! EntryHi:  | 31‒12 | 11‒6 | 5‒0 |
//!           |  VPN  | ASID |  0  |
//!
//! EntryLo:  | 31‒12 | 11 | 10 | 9 | 8 | 7‒0 |
//!           |  PFN  |  N |  D | V | G |  0  |
//! ```
//!
//! `D` ("dirty") is a software-managed **write enable**: the hardware
//! raises a read-only fault on a store through an entry with `D` clear,
//! and never sets the bit itself. `V` marks the entry usable; ASIDs are
//! unused (always zero) — activation flushes instead.

use bitfield_struct::bitfield;
use kernel_addresses::{PAGE_SHIFT, PhysicalAddress, VirtualAddress};
use kernel_spl::{Spl, SplGuard};

/// TLB match key: virtual page number plus address-space identifier.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryHi {
    #[bits(6)]
    __: u8,
    /// Address-space identifier (bits 6..12). Unused; kept zero.
    #[bits(6)]
    pub asid: u8,
    /// Virtual page number (bits 12..32).
    #[bits(20)]
    vpn: u32,
}

impl EntryHi {
    /// Match key for the page containing `va`; in-page bits are discarded.
    #[inline]
    #[must_use]
    pub const fn for_page(va: VirtualAddress) -> Self {
        Self::new().with_vpn(va.as_u32() >> PAGE_SHIFT)
    }

    /// Base address of the matched page.
    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualAddress {
        VirtualAddress::new(self.vpn() << PAGE_SHIFT)
    }
}

/// TLB translation word: physical frame number plus control bits.
///
/// Also the stored form of a page-table entry, so a refill is a plain
/// copy of the word out of the table.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryLo {
    #[bits(8)]
    __: u8,
    /// Global (bit 8): match regardless of ASID. Unused; kept zero.
    pub global: bool,
    /// Valid (bit 9): the entry may be used for translation.
    pub valid: bool,
    /// Dirty (bit 10): software-managed write enable.
    pub dirty: bool,
    /// No-cache (bit 11).
    pub no_cache: bool,
    /// Physical frame number (bits 12..32).
    #[bits(20)]
    pfn: u32,
}

impl EntryLo {
    /// A valid translation to `frame`, writable iff `writable`.
    #[inline]
    #[must_use]
    pub const fn for_frame(frame: PhysicalAddress, writable: bool) -> Self {
        Self::new()
            .with_pfn(frame.frame().as_u32() >> PAGE_SHIFT)
            .with_valid(true)
            .with_dirty(writable)
    }

    /// The physical frame this entry translates to, flag bits stripped.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalAddress {
        PhysicalAddress::new(self.pfn() << PAGE_SHIFT)
    }
}

/// Platform TLB primitives.
///
/// Both operations are invoked with interrupts masked by the caller (see
/// [`refill`] and [`flush`]); implementations touch only the TLB of the
/// current processor.
pub trait Tlb {
    /// Write `(hi, lo)` into a randomly selected TLB slot.
    fn write_random(&mut self, hi: EntryHi, lo: EntryLo);

    /// Drop every entry. After this returns, no previously written
    /// translation may match — this is the contract address-space
    /// activation relies on. The concrete mechanism (writing invalid
    /// entries into every slot, or cycling ASIDs) is the platform's
    /// choice.
    fn invalidate_all(&mut self);
}

/// Install one translation under raised interrupt priority.
///
/// The slot is picked by the hardware; the handler never chooses an
/// index. The masked section is a single TLB write.
pub(crate) fn refill(tlb: &mut impl Tlb, spl: &mut impl Spl, hi: EntryHi, lo: EntryLo) {
    let _masked = SplGuard::high(spl);
    tlb.write_random(hi, lo);
}

/// Invalidate the whole TLB under raised interrupt priority.
pub(crate) fn flush(tlb: &mut impl Tlb, spl: &mut impl Spl) {
    let _masked = SplGuard::high(spl);
    tlb.invalidate_all();
}

/// A request to invalidate a translation on another processor.
#[derive(Debug, Copy, Clone)]
pub struct TlbShootdown {
    /// Page whose translation should be dropped.
    pub page: VirtualAddress,
}

/// Handle an inter-processor TLB invalidation request.
///
/// # Panics
///
/// Always. This kernel runs a single processor and never sends shootdown
/// requests; receiving one means something is badly wrong. A multicore
/// port needs an IPI-driven invalidation protocol and per-address-space
/// locking first.
pub fn shootdown(request: &TlbShootdown) -> ! {
    panic!("tlb shootdown for {} on a uniprocessor kernel", request.page);
}
