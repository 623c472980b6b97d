//! Virtual memory manager for 32-bit x86 protected-mode paging (page
//! directory + page table, recursive mapping) on top of the flat GDT
//! segments set up by `arch::gdt`.

use core::arch::asm;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::drivers::screen::Screen;
use crate::logging;
use crate::memory::pmm;

const PT_ENTRIES: usize = 1024;
const SMALL_PAGE_SIZE: u32 = 4096;
const PAGE_MASK: u32 = !(SMALL_PAGE_SIZE - 1);

/// Number of page tables used to identity-map low memory in [`init`],
/// each covering 4MB. Two tables cover the kernel image, stack
/// (`pmm::STACK_TOP` at 4MB) and PMM metadata with headroom to spare.
const IDENTITY_PAGE_TABLES: u32 = 2;
/// First byte not covered by the identity mapping; everything from here
/// up is demand-paged through [`handle_page_fault`].
pub const IDENTITY_MAP_END: u32 = IDENTITY_PAGE_TABLES * PT_ENTRIES as u32 * SMALL_PAGE_SIZE;

/// Recursive self-map slot: PD[1023] points at the page directory itself,
/// so the directory and every page table become addressable through the
/// last 4MB of the address space without a dedicated physical-memory window.
const PD_SELF_INDEX: u32 = 1023;
const RECURSIVE_BASE: u32 = 0xFFC0_0000;

const ENTRY_PRESENT: u32 = 1 << 0;
const ENTRY_WRITABLE: u32 = 1 << 1;
const ENTRY_USER: u32 = 1 << 2;
const ENTRY_FRAME_MASK: u32 = 0xFFFF_F000;

const CR0_PG: u32 = 1 << 31;

#[derive(Clone, Copy)]
#[repr(transparent)]
struct PageTableEntry(u32);

impl PageTableEntry {
    #[inline]
    fn present(self) -> bool {
        (self.0 & ENTRY_PRESENT) != 0
    }

    #[inline]
    fn set_present(&mut self, val: bool) {
        if val {
            self.0 |= ENTRY_PRESENT;
        } else {
            self.0 &= !ENTRY_PRESENT;
        }
    }

    #[inline]
    #[allow(dead_code)]
    fn writable(self) -> bool {
        (self.0 & ENTRY_WRITABLE) != 0
    }

    #[inline]
    fn set_writable(&mut self, val: bool) {
        if val {
            self.0 |= ENTRY_WRITABLE;
        } else {
            self.0 &= !ENTRY_WRITABLE;
        }
    }

    #[inline]
    #[allow(dead_code)]
    fn user(self) -> bool {
        (self.0 & ENTRY_USER) != 0
    }

    #[inline]
    fn set_user(&mut self, val: bool) {
        if val {
            self.0 |= ENTRY_USER;
        } else {
            self.0 &= !ENTRY_USER;
        }
    }

    #[inline]
    fn frame(self) -> u32 {
        (self.0 & ENTRY_FRAME_MASK) >> 12
    }

    #[inline]
    fn set_frame(&mut self, pfn: u32) {
        self.0 = (self.0 & !ENTRY_FRAME_MASK) | ((pfn << 12) & ENTRY_FRAME_MASK);
    }

    #[inline]
    fn set_mapping(&mut self, pfn: u32, present: bool, writable: bool, user: bool) {
        self.set_frame(pfn);
        self.set_present(present);
        self.set_writable(writable);
        self.set_user(user);
    }

    #[inline]
    fn clear(&mut self) {
        self.0 = 0;
    }
}

#[repr(C, align(4096))]
struct PageTable {
    entries: [PageTableEntry; PT_ENTRIES],
}

impl PageTable {
    #[inline]
    fn zero(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.clear();
        }
    }
}

#[inline]
fn pd_index(va: u32) -> usize {
    ((va >> 22) & 0x3FF) as usize
}

#[inline]
fn pt_index(va: u32) -> usize {
    ((va >> 12) & 0x3FF) as usize
}

#[inline]
fn pd_virtual_addr() -> u32 {
    RECURSIVE_BASE + PD_SELF_INDEX * 0x1000
}

#[inline]
fn pt_virtual_addr(pd_idx: usize) -> u32 {
    RECURSIVE_BASE + (pd_idx as u32) * 0x1000
}

#[inline]
fn page_align_down(addr: u32) -> u32 {
    addr & PAGE_MASK
}

#[inline]
fn phys_to_pfn(addr: u32) -> u32 {
    addr / SMALL_PAGE_SIZE
}

unsafe fn read_cr3() -> u32 {
    let val: u32;
    unsafe {
        asm!("mov {}, cr3", out(reg) val, options(nomem, nostack, preserves_flags));
    }
    val
}

unsafe fn write_cr3(val: u32) {
    unsafe {
        asm!("mov cr3, {}", in(reg) val, options(nostack, preserves_flags));
    }
}

unsafe fn enable_paging() {
    unsafe {
        asm!(
            "mov {tmp}, cr0",
            "or {tmp}, {pg}",
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            pg = const CR0_PG,
            options(nostack, preserves_flags)
        );
    }
}

unsafe fn invlpg(addr: u32) {
    unsafe {
        asm!("invlpg [{}]", in(reg) addr, options(nostack, preserves_flags));
    }
}

struct VmmState {
    page_directory_physical: u32,
    debug_enabled: bool,
}

struct GlobalVmm {
    inner: UnsafeCell<VmmState>,
    initialized: AtomicBool,
}

impl GlobalVmm {
    const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(VmmState {
                page_directory_physical: 0,
                debug_enabled: false,
            }),
            initialized: AtomicBool::new(false),
        }
    }
}

unsafe impl Sync for GlobalVmm {}

static VMM: GlobalVmm = GlobalVmm::new();

#[inline]
fn with_vmm<R>(f: impl FnOnce(&mut VmmState) -> R) -> R {
    debug_assert!(VMM.initialized.load(Ordering::Acquire), "VMM not initialized");
    unsafe { f(&mut *VMM.inner.get()) }
}

#[inline]
fn alloc_frame_phys() -> u32 {
    pmm::with_pmm(|mgr| {
        mgr.alloc_frame()
            .expect("VMM: out of physical memory while allocating page frame")
            .physical_address() as u32
    })
}

#[inline]
unsafe fn table_at(addr: u32) -> &'static mut PageTable {
    unsafe { &mut *(addr as *mut PageTable) }
}

#[inline]
unsafe fn zero_phys_page(addr: u32) {
    unsafe {
        core::ptr::write_bytes(addr as *mut u8, 0, SMALL_PAGE_SIZE as usize);
    }
}

fn debug_enabled() -> bool {
    with_vmm(|state| state.debug_enabled)
}

/// Enables or disables VMM debug output and returns the previous setting.
pub fn set_debug_output(enabled: bool) -> bool {
    with_vmm(|state| {
        let old = state.debug_enabled;
        state.debug_enabled = enabled;
        old
    })
}

/// Enables console debug mirroring capture.
///
/// When enabled, VMM debug lines are captured and can be dumped to screen.
pub fn set_console_debug_output(enabled: bool) {
    logging::set_capture_enabled(enabled);
}

/// Writes captured VMM debug output to the screen.
pub fn print_console_debug_output(screen: &mut Screen) {
    logging::print_captured_target(screen, "vmm", |line| {
        line.starts_with("VMM: page fault raw=") || line.starts_with("VMM: indices pd=")
    });
}

fn debug_alloc(level: &str, idx: usize, pfn: u32) {
    if debug_enabled() {
        logging::logln("vmm", format_args!(
            "VMM: allocated PFN 0x{:x} for {} entry 0x{:x}",
            pfn,
            level,
            idx
        ));
    }
}

/// Initializes the virtual memory manager and switches CR3, then enables
/// paging via CR0.PG.
///
/// The new tables map:
/// - identity mapping for `0..IDENTITY_MAP_END`
/// - recursive mapping at PD\[1023\]
pub fn init(debug_output: bool) {
    let pd_phys = alloc_frame_phys();
    let mut identity_tables = [0u32; IDENTITY_PAGE_TABLES as usize];
    for slot in identity_tables.iter_mut() {
        *slot = alloc_frame_phys();
    }

    unsafe {
        zero_phys_page(pd_phys);
        for &table in identity_tables.iter() {
            zero_phys_page(table);
        }

        let pd = table_at(pd_phys);
        for (i, &table) in identity_tables.iter().enumerate() {
            pd.entries[i].set_mapping(phys_to_pfn(table), true, true, false);
        }
        pd.entries[PD_SELF_INDEX as usize].set_mapping(phys_to_pfn(pd_phys), true, true, false);

        for (i, &table) in identity_tables.iter().enumerate() {
            let pt = table_at(table);
            let base_page = i as u32 * PT_ENTRIES as u32;
            for j in 0..PT_ENTRIES {
                pt.entries[j].set_mapping(base_page + j as u32, true, true, false);
            }
        }
    }

    unsafe {
        (*VMM.inner.get()).page_directory_physical = pd_phys;
        (*VMM.inner.get()).debug_enabled = debug_output;
    }
    VMM.initialized.store(true, Ordering::Release);

    unsafe {
        write_cr3(pd_phys);
        enable_paging();
    }
}

/// Returns the currently active page directory's physical address.
#[allow(dead_code)]
pub fn get_page_directory_address() -> u32 {
    with_vmm(|state| state.page_directory_physical)
}

/// Switches to the provided page directory (physical address).
///
/// # Safety
/// The caller must ensure `pd_phys` points to a valid, fully initialized
/// page directory in physical memory, including its own recursive
/// self-map slot. Switching to an invalid CR3 target can immediately
/// crash the kernel due to page faults/triple fault.
#[allow(dead_code)]
pub unsafe fn switch_page_directory(pd_phys: u32) {
    unsafe { write_cr3(pd_phys) };
    with_vmm(|state| {
        state.page_directory_physical = pd_phys;
    });
}

#[inline]
unsafe fn ensure_tables_for(virtual_address: u32) {
    let pd = unsafe { table_at(pd_virtual_addr()) };
    let pd_idx = pd_index(virtual_address);
    if !pd.entries[pd_idx].present() {
        let new_table_phys = alloc_frame_phys();
        pd.entries[pd_idx].set_mapping(phys_to_pfn(new_table_phys), true, true, false);
        unsafe { invlpg(pt_virtual_addr(pd_idx)) };
        let new_pt = unsafe { table_at(pt_virtual_addr(pd_idx)) };
        new_pt.zero();
        debug_alloc("PD", pd_idx, pd.entries[pd_idx].frame());
    }
}

/// Handles page faults by demand-allocating page tables and target page
/// frame, unless `error_code` marks a protection violation (a fault on a
/// page that is already present), which is a programming error and not
/// something demand paging can fix.
pub fn handle_page_fault(virtual_address: u32, error_code: u32) {
    if error_code & 0x1 != 0 {
        panic!(
            "VMM: protection page fault addr=0x{:x} err=0x{:x}",
            virtual_address, error_code
        );
    }

    let fault_address_raw = virtual_address;
    let virtual_address = page_align_down(fault_address_raw);

    if debug_enabled() {
        let cr3 = unsafe { read_cr3() };
        logging::logln("vmm", format_args!(
            "VMM: page fault raw=0x{:x} aligned=0x{:x} cr3=0x{:x} err=0x{:x}",
            fault_address_raw,
            virtual_address,
            cr3,
            error_code
        ));
        logging::logln("vmm", format_args!(
            "VMM: indices pd={} pt={}",
            pd_index(virtual_address),
            pt_index(virtual_address)
        ));
        logging::logln("vmm", format_args!(
            "VMM: err bits p={} w={} u={} rsv={} ifetch={}",
            (error_code & (1 << 0)) != 0,
            (error_code & (1 << 1)) != 0,
            (error_code & (1 << 2)) != 0,
            (error_code & (1 << 3)) != 0,
            (error_code & (1 << 4)) != 0
        ));
    }

    unsafe {
        ensure_tables_for(virtual_address);
        let pt = table_at(pt_virtual_addr(pd_index(virtual_address)));
        let pt_idx = pt_index(virtual_address);
        if !pt.entries[pt_idx].present() {
            let new_page_phys = alloc_frame_phys();
            pt.entries[pt_idx].set_mapping(phys_to_pfn(new_page_phys), true, true, false);
            invlpg(virtual_address);
            debug_alloc("PT", pt_idx, pt.entries[pt_idx].frame());
        }
    }
}

/// Maps `virtual_address` to `physical_address` with present + writable flags.
#[allow(dead_code)]
pub fn map_virtual_to_physical(virtual_address: u32, physical_address: u32) {
    let virtual_address = page_align_down(virtual_address);
    let physical_address = page_align_down(physical_address);

    unsafe {
        ensure_tables_for(virtual_address);
        let pt = table_at(pt_virtual_addr(pd_index(virtual_address)));
        let pt_idx = pt_index(virtual_address);
        pt.entries[pt_idx].set_mapping(phys_to_pfn(physical_address), true, true, false);
        invlpg(virtual_address);
        debug_alloc("PT", pt_idx, pt.entries[pt_idx].frame());
    }
}

/// Unmaps the given virtual address and invalidates the corresponding TLB entry.
pub fn unmap_virtual_address(virtual_address: u32) {
    let virtual_address = page_align_down(virtual_address);

    unsafe {
        let pd = table_at(pd_virtual_addr());
        let pd_idx = pd_index(virtual_address);
        if !pd.entries[pd_idx].present() {
            return;
        }
        let pt = table_at(pt_virtual_addr(pd_idx));
        let pt_idx = pt_index(virtual_address);
        if pt.entries[pt_idx].present() {
            pt.entries[pt_idx].clear();
            invlpg(virtual_address);
        }
    }
}

/// Basic VMM smoke test that triggers page faults and verifies readback.
/// Test addresses sit above the identity-mapped region so the writes
/// below genuinely fault and exercise demand paging.
pub fn test_vmm() -> bool {
    logging::logln("vmm", format_args!("VMM test: start"));
    const TEST_ADDR1: u32 = IDENTITY_MAP_END + 0x0100_0000;
    const TEST_ADDR2: u32 = IDENTITY_MAP_END + 0x0200_0000;
    const TEST_ADDR3: u32 = IDENTITY_MAP_END + 0x0300_0000;
    let ok: bool;
    unsafe {
        logging::logln("vmm", format_args!("VMM test: write to 0x{:x}", TEST_ADDR1));
        let addr1 = TEST_ADDR1 as *mut u8;
        core::ptr::write_volatile(addr1, b'A');

        logging::logln("vmm", format_args!("VMM test: write to 0x{:x}", TEST_ADDR2));
        let ptr2 = TEST_ADDR2 as *mut u8;
        core::ptr::write_volatile(ptr2, b'B');

        logging::logln("vmm", format_args!("VMM test: write to 0x{:x}", TEST_ADDR3));
        let ptr3 = TEST_ADDR3 as *mut u8;
        core::ptr::write_volatile(ptr3, b'C');

        logging::logln("vmm", format_args!("VMM test: readback and verify"));
        let v1 = core::ptr::read_volatile(addr1);
        let v2 = core::ptr::read_volatile(ptr2);
        let v3 = core::ptr::read_volatile(ptr3);

        ok = v1 == b'A' && v2 == b'B' && v3 == b'C';
        if ok {
            logging::logln("vmm", format_args!("VMM test: readback OK (A, B, C)"));
        } else {
            logging::logln("vmm", format_args!(
                "VMM test: readback FAILED got [{:#x}, {:#x}, {:#x}] expected [0x41, 0x42, 0x43]",
                v1,
                v2,
                v3
            ));
        }

        // Unmap test pages so the next `vmmtest` run triggers page faults again.
        unmap_virtual_address(addr1 as u32);
        unmap_virtual_address(ptr2 as u32);
        unmap_virtual_address(ptr3 as u32);
        logging::logln("vmm", format_args!("VMM test: unmapped test pages"));
    }
    logging::logln("vmm", format_args!("VMM test: done (ok={})", ok));
    logging::logln("vmm", format_args!(""));
    ok
}
