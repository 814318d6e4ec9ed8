//! End-to-end fault-handling scenarios against a mock machine: a frame
//! allocator handing out kernel-window addresses over host-backed frames,
//! a recording TLB, and a counting interrupt-priority controller.

use core::cell::UnsafeCell;
use kernel_addresses::layout::{KSEG0_BASE, USER_STACK_SIZE};
use kernel_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_spl::{Ipl, Spl};
use kernel_vm::tlb::TlbShootdown;
use kernel_vm::{
    AddressSpace, EntryHi, EntryLo, FAULT_READ, FAULT_READONLY, FAULT_WRITE, FrameAlloc,
    KernelWindow, PageFrame, Permissions, Tlb, VmError, tlb, vm_fault,
};

/// Where the fake physical memory starts; everything below is "reserved".
const PHYS_BASE: u32 = 0x0010_0000;

const RX: Permissions = Permissions::READ.union(Permissions::EXECUTE);

/// Free-list frame allocator dealing in kernel-window addresses.
struct TestAlloc {
    free: Vec<u32>,
    outstanding: Vec<u32>,
    freed: usize,
}

impl TestAlloc {
    fn with_frames(n: usize) -> Self {
        Self {
            free: (0..n as u32)
                .rev()
                .map(|i| KSEG0_BASE + PHYS_BASE + i * PAGE_SIZE)
                .collect(),
            outstanding: Vec::new(),
            freed: 0,
        }
    }

    fn live(&self) -> usize {
        self.outstanding.len()
    }
}

impl FrameAlloc for TestAlloc {
    fn alloc_kpage(&mut self) -> Option<VirtualAddress> {
        let page = self.free.pop()?;
        self.outstanding.push(page);
        Some(VirtualAddress::new(page))
    }

    fn free_kpage(&mut self, page: VirtualAddress) {
        let pos = self
            .outstanding
            .iter()
            .position(|&p| p == page.as_u32())
            .expect("freeing a frame that was never allocated");
        self.outstanding.swap_remove(pos);
        self.free.push(page.as_u32());
        self.freed += 1;
    }
}

/// A 4 KiB-aligned backing frame.
#[repr(align(4096))]
struct Frame(UnsafeCell<PageFrame>);

/// Host-backed stand-in for the direct-mapped kernel window.
struct TestWindow {
    frames: Vec<Frame>,
}

impl TestWindow {
    fn with_frames(n: usize) -> Self {
        Self {
            frames: (0..n)
                .map(|_| Frame(UnsafeCell::new([0u8; PAGE_SIZE as usize])))
                .collect(),
        }
    }

    fn index_of(&self, page: VirtualAddress) -> usize {
        ((page.as_u32() - KSEG0_BASE - PHYS_BASE) / PAGE_SIZE) as usize
    }

    /// Scribble over every frame, so zero-filling is observable.
    fn poison(&mut self) {
        for frame in &mut self.frames {
            frame.0.get_mut().fill(0xaa);
        }
    }
}

impl KernelWindow for TestWindow {
    unsafe fn frame_mut<'a>(&self, page: VirtualAddress) -> &'a mut PageFrame {
        let idx = self.index_of(page);
        // SAFETY: the caller promises exclusive access to a live frame.
        unsafe { &mut *self.frames[idx].0.get() }
    }
}

/// Records every TLB write; invalidation empties the recorded set.
#[derive(Default)]
struct TestTlb {
    writes: Vec<(u32, u32)>,
    invalidations: usize,
}

impl Tlb for TestTlb {
    fn write_random(&mut self, hi: EntryHi, lo: EntryLo) {
        self.writes.push((hi.into_bits(), lo.into_bits()));
    }

    fn invalidate_all(&mut self) {
        self.invalidations += 1;
        self.writes.clear();
    }
}

/// Counts raises and restores; they must balance.
#[derive(Default)]
struct TestSpl {
    level: u32,
    raises: usize,
    restores: usize,
}

impl Spl for TestSpl {
    fn splhigh(&mut self) -> Ipl {
        self.raises += 1;
        let prev = Ipl::new(self.level);
        self.level = u32::MAX;
        prev
    }

    fn splx(&mut self, prev: Ipl) {
        self.restores += 1;
        self.level = prev.as_raw();
    }
}

struct Machine {
    alloc: TestAlloc,
    window: TestWindow,
    tlb: TestTlb,
    spl: TestSpl,
}

impl Machine {
    fn with_frames(n: usize) -> Self {
        Self {
            alloc: TestAlloc::with_frames(n),
            window: TestWindow::with_frames(n),
            tlb: TestTlb::default(),
            spl: TestSpl::default(),
        }
    }

    fn fault(
        &mut self,
        space: &mut AddressSpace,
        fault_type: u32,
        address: u32,
    ) -> Result<(), VmError> {
        vm_fault(
            &mut self.alloc,
            &self.window,
            &mut self.tlb,
            &mut self.spl,
            Some(space),
            fault_type,
            VirtualAddress::new(address),
        )
    }

    fn last_write(&self) -> (u32, u32) {
        *self.tlb.writes.last().expect("no TLB write recorded")
    }
}

fn va(v: u32) -> VirtualAddress {
    VirtualAddress::new(v)
}

#[test]
fn read_fault_in_region_demand_maps_a_zeroed_page() {
    let mut m = Machine::with_frames(8);
    m.window.poison();

    let mut space = AddressSpace::new().unwrap();
    space.define_region(va(0x0040_0000), 0x1000, RX).unwrap();

    m.fault(&mut space, FAULT_READ, 0x0040_0abc).unwrap();

    // One frame allocated and zero-filled.
    assert_eq!(m.alloc.live(), 1);
    let frame_kva = va(m.alloc.outstanding[0]);
    let idx = m.window.index_of(frame_kva);
    assert!(m.window.frames[idx].0.get_mut().iter().all(|&b| b == 0));

    // The page table holds the translation, write enable clear.
    assert_eq!(
        space.directory().lookup(va(0x0040_0abc)),
        Some(frame_kva.to_physical())
    );

    // The TLB got the page-aligned key and a valid, non-writable entry.
    let (hi, lo) = m.last_write();
    assert_eq!(hi, 0x0040_0000);
    assert_eq!(lo & 0xfff, 0x200);
    assert_eq!(lo & !0xfffu32, frame_kva.to_physical().as_u32());

    // Priority was raised and restored around the write.
    assert_eq!(m.spl.raises, 1);
    assert_eq!(m.spl.restores, 1);
    assert_eq!(m.spl.level, 0);
}

#[test]
fn second_fault_on_the_same_page_reuses_the_translation() {
    let mut m = Machine::with_frames(8);
    let mut space = AddressSpace::new().unwrap();
    space.define_region(va(0x0040_0000), 0x1000, RX).unwrap();

    m.fault(&mut space, FAULT_READ, 0x0040_0abc).unwrap();
    let first = m.last_write();

    m.fault(&mut space, FAULT_READ, 0x0040_0004).unwrap();

    // Same entry refilled; no extra frame.
    assert_eq!(m.last_write(), first);
    assert_eq!(m.alloc.live(), 1);
    assert_eq!(m.tlb.writes.len(), 2);
}

#[test]
fn write_to_a_read_only_region_is_denied_without_allocating() {
    let mut m = Machine::with_frames(8);
    let mut space = AddressSpace::new().unwrap();
    space.define_region(va(0x0040_0000), 0x1000, RX).unwrap();

    let err = m.fault(&mut space, FAULT_WRITE, 0x0040_0abc).unwrap_err();
    assert_eq!(err, VmError::NotPermitted);

    assert_eq!(m.alloc.live(), 0);
    assert!(m.tlb.writes.is_empty());
    assert!(space.directory().lookup(va(0x0040_0abc)).is_none());
}

#[test]
fn faults_fail_cleanly_without_a_space_or_regions() {
    let mut m = Machine::with_frames(8);

    // Kernel thread: no address space behind the trap.
    let none = vm_fault(
        &mut m.alloc,
        &m.window,
        &mut m.tlb,
        &mut m.spl,
        None,
        FAULT_READ,
        va(0x1000_0000),
    );
    assert_eq!(none, Err(VmError::BadAddress));

    // A space with no regions rejects everything early.
    let mut space = AddressSpace::new().unwrap();
    assert_eq!(
        m.fault(&mut space, FAULT_READ, 0x1000_0000),
        Err(VmError::BadAddress)
    );

    // Outside every defined region.
    space.define_region(va(0x0040_0000), 0x1000, RX).unwrap();
    assert_eq!(
        m.fault(&mut space, FAULT_READ, 0x1000_0000),
        Err(VmError::BadAddress)
    );

    // Read-only faults are final, and checked before the region walk.
    assert_eq!(
        m.fault(&mut space, FAULT_READONLY, 0x0040_0000),
        Err(VmError::BadAddress)
    );

    // Unknown trap codes are malformed, even with no regions defined.
    let mut empty = AddressSpace::new().unwrap();
    assert_eq!(
        m.fault(&mut empty, 9, 0x0040_0000),
        Err(VmError::InvalidArgument)
    );

    assert_eq!(m.alloc.live(), 0);
    assert!(m.tlb.writes.is_empty());
}

#[test]
fn region_definition_rejects_overlap_and_kernel_crossing() {
    let mut space = AddressSpace::new().unwrap();
    space.define_region(va(0x0040_0000), 0x2000, RX).unwrap();

    assert_eq!(
        space.define_region(
            va(0x0040_1000),
            0x2000,
            Permissions::READ | Permissions::WRITE
        ),
        Err(VmError::InvalidArgument)
    );
    assert_eq!(space.regions().len(), 1);

    assert_eq!(
        space.define_region(
            va(KSEG0_BASE - 0x1000),
            0x2000,
            Permissions::READ | Permissions::WRITE
        ),
        Err(VmError::BadAddress)
    );
    assert_eq!(space.regions().len(), 1);
}

#[test]
fn load_transition_widens_then_revokes_write_access() {
    let mut m = Machine::with_frames(8);
    let mut space = AddressSpace::new().unwrap();
    space.define_region(va(0x0040_0000), 0x2000, RX).unwrap();

    // While loading, the loader may write into the text segment.
    space.prepare_load().unwrap();
    m.fault(&mut space, FAULT_WRITE, 0x0040_0000).unwrap();
    let (_, lo) = m.last_write();
    assert_eq!(lo & 0x600, 0x600, "entry must be valid and writable");

    // Balanced transition only.
    assert_eq!(space.prepare_load(), Err(VmError::InvalidArgument));

    space.complete_load(&mut m.tlb, &mut m.spl).unwrap();

    // The stale writable translation is gone from the TLB.
    assert_eq!(m.tlb.invalidations, 1);
    assert!(m.tlb.writes.is_empty());

    // Permissions are back; the installed entry lost its write enable.
    assert_eq!(
        space.regions().find(va(0x0040_0000)).unwrap().permissions(),
        RX
    );
    m.fault(&mut space, FAULT_READ, 0x0040_0000).unwrap();
    let (_, lo) = m.last_write();
    assert_eq!(lo & 0x600, 0x200, "entry must be valid and read-only");

    // A store now reaches the handler as a read-only fault and fails.
    assert_eq!(
        m.fault(&mut space, FAULT_READONLY, 0x0040_0000),
        Err(VmError::BadAddress)
    );

    assert_eq!(m.spl.raises, m.spl.restores);
    assert_eq!(m.spl.level, 0);
}

#[test]
fn stack_region_backs_stack_faults() {
    let mut m = Machine::with_frames(8);
    let mut space = AddressSpace::new().unwrap();

    let sp = space.define_stack().unwrap();
    assert_eq!(sp, va(KSEG0_BASE));

    // Push just below the top of the stack.
    m.fault(&mut space, FAULT_WRITE, sp.as_u32() - 4).unwrap();
    let (hi, lo) = m.last_write();
    assert_eq!(hi, KSEG0_BASE - PAGE_SIZE);
    assert_eq!(lo & 0x600, 0x600);

    // Below the stack region there is nothing.
    assert_eq!(
        m.fault(&mut space, FAULT_READ, sp.as_u32() - USER_STACK_SIZE - 4),
        Err(VmError::BadAddress)
    );
}

#[test]
fn destroy_returns_every_demand_mapped_frame() {
    let mut m = Machine::with_frames(8);
    let mut space = AddressSpace::new().unwrap();
    space.define_region(va(0x0040_0000), 0x0040_0000, RX).unwrap();
    space.define_stack().unwrap();

    // Touch pages in two different directory slots plus the stack.
    m.fault(&mut space, FAULT_READ, 0x0040_0000).unwrap();
    m.fault(&mut space, FAULT_READ, 0x0060_0000).unwrap();
    m.fault(&mut space, FAULT_WRITE, KSEG0_BASE - 8).unwrap();
    assert_eq!(m.alloc.live(), 3);

    space.destroy(&mut m.alloc);
    assert_eq!(m.alloc.live(), 0);
    assert_eq!(m.alloc.freed, 3);
}

#[test]
fn frame_exhaustion_reports_out_of_memory_and_installs_nothing() {
    let mut m = Machine::with_frames(1);
    let mut space = AddressSpace::new().unwrap();
    space.define_region(va(0x0040_0000), 0x2000, RX).unwrap();

    m.fault(&mut space, FAULT_READ, 0x0040_0000).unwrap();
    assert_eq!(
        m.fault(&mut space, FAULT_READ, 0x0040_1000),
        Err(VmError::OutOfMemory)
    );

    assert_eq!(m.alloc.live(), 1);
    assert!(space.directory().lookup(va(0x0040_1000)).is_none());

    // The first page still works: its translation survived.
    m.fault(&mut space, FAULT_READ, 0x0040_0004).unwrap();
}

#[test]
#[should_panic(expected = "shootdown")]
fn tlb_shootdown_is_unsupported() {
    tlb::shootdown(&TlbShootdown {
        page: VirtualAddress::new(0x0040_0000),
    });
}
