//! # Memory Layout
//!
//! The fixed virtual-address-space layout of the machine. User addresses
//! occupy the lower 2 GiB; everything at [`KSEG0_BASE`] and above belongs
//! to the kernel and is never mapped through the page table.

use crate::PAGE_SIZE;

/// Base of the direct-mapped, cached kernel segment. Physical frame `pa`
/// appears at `KSEG0_BASE + pa`; this is also the end of userspace.
pub const KSEG0_BASE: u32 = 0x8000_0000;

/// Base of the uncached kernel segment, ending the kseg0 window.
pub const KSEG1_BASE: u32 = 0xa000_0000;

/// Amount of physical memory reachable through the kseg0 window.
pub const KSEG0_SIZE: u32 = KSEG1_BASE - KSEG0_BASE;

/// First address past the last legal user address.
pub const USERSPACE_TOP: u32 = KSEG0_BASE;

/// Initial user stack pointer; the stack grows down from here.
pub const USER_STACK_TOP: u32 = USERSPACE_TOP;

/// Default size of a user stack.
pub const USER_STACK_SIZE: u32 = 16 * PAGE_SIZE;

const _: () = {
    assert!(USER_STACK_SIZE % PAGE_SIZE == 0);
    assert!(USER_STACK_SIZE < USER_STACK_TOP);
    assert!(USERSPACE_TOP % PAGE_SIZE == 0);
};
