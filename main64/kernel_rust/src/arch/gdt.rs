//! Global Descriptor Table (GDT) and Task-State Segment (TSS) setup.
//!
//! This module installs a minimal protected-mode GDT with:
//! - kernel code/data segments
//! - user code/data segments
//! - one available 32-bit TSS descriptor
//!
//! It is the architectural foundation required before ring-3 tasks can be
//! introduced. No ring-3 task execution is implemented here yet.

use core::arch::{asm, global_asm};
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use alloc::vec;
use alloc::vec::Vec;

/// Which descriptor table a [`SegmentSelector`] indexes into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentTable {
    Gdt,
    Ldt,
}

/// A 16-bit segment selector: `(index << 3) | (ldt ? 4 : 0) | rpl`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentSelector(u16);

impl SegmentSelector {
    pub const fn new(index: u16, table: SegmentTable, rpl: u8) -> Self {
        let table_bit = match table {
            SegmentTable::Gdt => 0,
            SegmentTable::Ldt => 1 << 2,
        };
        Self((index << 3) | table_bit | (rpl as u16 & 0x3))
    }

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Index this selector names, independent of table bit and RPL.
    pub const fn index(&self) -> u16 {
        self.0 >> 3
    }
}

/// Whether a descriptor describes a code/data segment or a system segment
/// (TSS/LDT). Mirrors the `S` bit (bit 44) of the access byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    TssOrLdt,
    CodeOrData,
}

// x86 descriptor access-byte bits (bits 40-47 of the packed descriptor).
const ACCESS_PRESENT: u64 = 1 << 47;
const ACCESS_SEGMENT: u64 = 1 << 44; // 1 = code/data segment, 0 = system segment
const ACCESS_EXECUTABLE: u64 = 1 << 43; // code=1, data=0
const ACCESS_DIRECTION: u64 = 1 << 42; // direction/conforming bit
const ACCESS_RW: u64 = 1 << 41; // readable code / writable data
const ACCESS_ACCESSED: u64 = 1 << 40;
const ACCESS_TSS_AVAILABLE: u64 = 0x9 << 40; // 32-bit available TSS system type

// Granularity-byte bits (bits 54-55 of the packed descriptor).
const FLAGS_GRANULARITY_4K: u64 = 1 << 55;
const FLAGS_SIZE_32: u64 = 1 << 54;

const LIMIT_MAX: u32 = 0x000F_FFFF;

/// A single 8-byte GDT entry.
///
/// Carries its own validity flag rather than being representable only in a
/// valid state: a descriptor built from a limit greater than `2^20 - 1` is
/// constructed but marked invalid, matching `Gdt::push_back`'s contract of
/// rejecting it rather than silently truncating the limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentDescriptor {
    value: u64,
    valid: bool,
}

impl SegmentDescriptor {
    /// Builds a code/data (or LDT-style) segment descriptor.
    ///
    /// `executable`/`direction`/`permissive`/`accessed` follow the classic
    /// IA-32 access-byte naming: `permissive` makes code segments readable
    /// and data segments writable; `direction` is the direction/conforming
    /// bit, normally `false`.
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        base: u32,
        limit: u32,
        granularity: bool,
        size32: bool,
        ring: u8,
        kind: SegmentKind,
        executable: bool,
        direction: bool,
        permissive: bool,
        accessed: bool,
    ) -> Self {
        if limit > LIMIT_MAX {
            return Self {
                value: 0,
                valid: false,
            };
        }

        let mut value = 0u64;
        value |= (limit as u64) & 0xFFFF;
        value |= ((limit as u64) & 0x000F_0000) << 32;
        value |= ((base as u64) & 0x00FF_FFFF) << 16;
        value |= ((base as u64) & 0xFF00_0000) << 32;

        value |= ACCESS_PRESENT;
        value |= ((ring as u64) & 0x3) << 45;
        if let SegmentKind::CodeOrData = kind {
            value |= ACCESS_SEGMENT;
        }
        if executable {
            value |= ACCESS_EXECUTABLE;
        }
        if direction {
            value |= ACCESS_DIRECTION;
        }
        if permissive {
            value |= ACCESS_RW;
        }
        if accessed {
            value |= ACCESS_ACCESSED;
        }
        if granularity {
            value |= FLAGS_GRANULARITY_4K;
        }
        if size32 {
            value |= FLAGS_SIZE_32;
        }

        Self { value, valid: true }
    }

    /// Builds the system-segment descriptor for a 32-bit available TSS.
    pub const fn tss(base: u32, limit: u32) -> Self {
        if limit > LIMIT_MAX {
            return Self {
                value: 0,
                valid: false,
            };
        }

        let mut value = 0u64;
        value |= (limit as u64) & 0xFFFF;
        value |= ((limit as u64) & 0x000F_0000) << 32;
        value |= ((base as u64) & 0x00FF_FFFF) << 16;
        value |= ((base as u64) & 0xFF00_0000) << 32;
        value |= ACCESS_PRESENT | ACCESS_TSS_AVAILABLE;

        Self { value, valid: true }
    }

    /// The null descriptor that must always occupy GDT index 0.
    pub const fn null() -> Self {
        Self {
            value: 0,
            valid: true,
        }
    }

    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    pub const fn raw(&self) -> u64 {
        self.value
    }
}

/// A 104-byte classic 32-bit Task-State Segment.
///
/// Only word index 1 (`esp0`) and word index 2 (`ss0`) are meaningful to
/// this kernel: every other field is zero-initialised and unused, since
/// this kernel neither hardware-task-switches nor uses the I/O permission
/// bitmap.
#[repr(C)]
pub struct Tss {
    words: [u32; Self::WORD_COUNT],
}

impl Tss {
    pub const SIZE: usize = 104;
    const WORD_COUNT: usize = Self::SIZE / 4;

    pub const fn new() -> Self {
        Self {
            words: [0; Self::WORD_COUNT],
        }
    }

    pub fn esp0(&self) -> u32 {
        self.words[1]
    }

    pub fn set_esp0(&mut self, esp0: u32) {
        self.words[1] = esp0;
    }

    pub fn ss0(&self) -> u32 {
        self.words[2]
    }

    pub fn set_ss0(&mut self, ss0: u32) {
        self.words[2] = ss0;
    }

    fn as_ptr(&self) -> *const u32 {
        self.words.as_ptr()
    }
}

/// Ordered sequence of [`SegmentDescriptor`] values plus the role indices
/// the kernel needs to install and activate itself.
///
/// Index 0 is always the null descriptor; `load()` refuses to install the
/// table unless the kernel-CS, kernel-DS and user-TSS roles have all been
/// assigned to a non-null index.
pub struct Gdt {
    entries: Vec<SegmentDescriptor>,
    kernel_cs: usize,
    kernel_ds: usize,
    user_cs: usize,
    user_ds: usize,
    user_tss: usize,
}

impl Gdt {
    pub fn new() -> Self {
        Self {
            entries: vec![SegmentDescriptor::null()],
            kernel_cs: 0,
            kernel_ds: 0,
            user_cs: 0,
            user_ds: 0,
            user_tss: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Appends `entry`. Fails (no-op, returns `false`) if the descriptor
    /// was constructed from an out-of-range limit.
    pub fn push_back(&mut self, entry: SegmentDescriptor) -> bool {
        if !entry.is_valid() {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Removes the entry at `index`. Fails on index 0 (the null
    /// descriptor) or an out-of-range index.
    pub fn erase(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.entries.len() {
            return false;
        }
        self.entries.remove(index);
        true
    }

    pub fn inspect(&self, index: usize) -> Option<SegmentDescriptor> {
        self.entries.get(index).copied()
    }

    fn assign_role(role: &mut usize, len: usize, index: usize) -> bool {
        if index == 0 || index >= len {
            return false;
        }
        *role = index;
        true
    }

    pub fn set_kernel_mode_cs(&mut self, index: usize) -> bool {
        Self::assign_role(&mut self.kernel_cs, self.entries.len(), index)
    }

    pub fn set_kernel_mode_ds(&mut self, index: usize) -> bool {
        Self::assign_role(&mut self.kernel_ds, self.entries.len(), index)
    }

    pub fn set_user_mode_cs(&mut self, index: usize) -> bool {
        Self::assign_role(&mut self.user_cs, self.entries.len(), index)
    }

    pub fn set_user_mode_ds(&mut self, index: usize) -> bool {
        Self::assign_role(&mut self.user_ds, self.entries.len(), index)
    }

    pub fn set_user_mode_tss(&mut self, index: usize) -> bool {
        Self::assign_role(&mut self.user_tss, self.entries.len(), index)
    }

    /// Installs the table, resets CS and DS, then loads the TSS selector.
    /// No-op (returns `false`) if kernel-CS, kernel-DS or user-TSS roles
    /// have not been assigned.
    pub fn load(&self) -> bool {
        if self.kernel_cs == 0 || self.kernel_ds == 0 || self.user_tss == 0 {
            return false;
        }

        let cs = SegmentSelector::new(self.kernel_cs as u16, SegmentTable::Gdt, 0);
        let ds = SegmentSelector::new(self.kernel_ds as u16, SegmentTable::Gdt, 0);
        let tss = SegmentSelector::new(self.user_tss as u16, SegmentTable::Gdt, 0);

        let ptr = DescriptorTablePointer {
            limit: (self.entries.len() * 8 - 1) as u16,
            base: self.entries.as_ptr() as u32,
        };

        // SAFETY:
        // - This requires `unsafe` because it loads privileged CPU descriptor-table
        //   registers, which Rust cannot validate.
        // - `ptr` addresses a `Vec` this `Gdt` owns and keeps alive for the rest of
        //   the kernel's lifetime (the table is never reallocated after `load()`).
        // - `cs`/`ds`/`tss` all name descriptors present in the table just installed.
        unsafe {
            load_gdt(&ptr);
            reset_segments(cs.raw(), ds.raw());
            load_tss(tss.raw());
        }

        true
    }
}

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

extern "C" {
    fn load_gdt(ptr: *const DescriptorTablePointer);
    fn reset_segments(cs: u16, ds: u16);
    fn load_tss(selector: u16);
}

global_asm!(
    r#"
    .section .text
    .global load_gdt
    .type load_gdt, @function
load_gdt:
    push ebp
    mov ebp, esp
    mov eax, [ebp+8]
    lgdt [eax]
    pop ebp
    ret
"#,
);

global_asm!(
    r#"
    .section .text
    .global reset_segments
    .type reset_segments, @function
reset_segments:
    push ebp
    mov ebp, esp
    push ebx
    movzx eax, word ptr [ebp+8]
    movzx ebx, word ptr [ebp+12]
    mov ds, bx
    mov es, bx
    mov fs, bx
    mov gs, bx
    mov ss, bx
    pop ebx
    # Reloading CS requires a far transfer; push a far-return frame to the
    # kernel code selector and the label right after it.
    push eax
    push offset 1f
    retf
1:
    pop ebp
    ret
"#,
);

global_asm!(
    r#"
    .section .text
    .global load_tss
    .type load_tss, @function
load_tss:
    push ebp
    mov ebp, esp
    movzx eax, word ptr [ebp+8]
    ltr ax
    pop ebp
    ret
"#,
);

// Layout of the installed GDT, matching the order `init()` builds it in:
//   [0] null
//   [1] kernel code
//   [2] kernel data
//   [3] user code
//   [4] user data
//   [5] TSS descriptor
const KERNEL_CODE_INDEX: u16 = 1;
const KERNEL_DATA_INDEX: u16 = 2;
const USER_CODE_INDEX: u16 = 3;
const USER_DATA_INDEX: u16 = 4;
const TSS_INDEX: u16 = 5;

/// Kernel code segment selector (ring 0).
pub const KERNEL_CODE_SELECTOR: u16 = SegmentSelector::new(KERNEL_CODE_INDEX, SegmentTable::Gdt, 0).raw();

/// Kernel data segment selector (ring 0).
pub const KERNEL_DATA_SELECTOR: u16 = SegmentSelector::new(KERNEL_DATA_INDEX, SegmentTable::Gdt, 0).raw();

/// User code segment selector (ring 3).
pub const USER_CODE_SELECTOR: u16 = SegmentSelector::new(USER_CODE_INDEX, SegmentTable::Gdt, 3).raw();

/// User data segment selector (ring 3).
pub const USER_DATA_SELECTOR: u16 = SegmentSelector::new(USER_DATA_INDEX, SegmentTable::Gdt, 3).raw();

/// TSS selector.
pub const TSS_SELECTOR: u16 = SegmentSelector::new(TSS_INDEX, SegmentTable::Gdt, 0).raw();

struct GdtState {
    gdt: UnsafeCell<Option<Gdt>>,
    tss: UnsafeCell<Tss>,
}

// SAFETY:
// - This requires `unsafe` because the compiler cannot automatically verify the
//   thread-safety invariants of this `unsafe impl`.
// - `GdtState` is a singleton accessed in controlled boot sequencing.
// - Mutable access uses `UnsafeCell` under kernel initialization invariants.
unsafe impl Sync for GdtState {}

static STATE: GdtState = GdtState {
    gdt: UnsafeCell::new(None),
    tss: UnsafeCell::new(Tss::new()),
};
static INITIALIZED: AtomicBool = AtomicBool::new(false);

#[inline]
fn read_esp() -> u32 {
    let esp: u32;
    // SAFETY:
    // - This requires `unsafe` because inline assembly and privileged CPU instructions
    //   are outside Rust's static safety model.
    // - Reading `esp` into a general-purpose register is side-effect free.
    unsafe {
        asm!("mov {}, esp", out(reg) esp, options(nomem, nostack, preserves_flags));
    }
    esp
}

/// Initializes and loads the kernel GDT/TSS.
///
/// Initialization contract:
/// - build an internally consistent GDT image in memory
/// - publish a TSS whose `esp0` points at the current kernel stack
/// - switch GDTR to this GDT, reload the segment registers, and load TR
///   from the TSS descriptor
pub fn init() {
    let current_esp = read_esp();

    // SAFETY:
    // - This requires `unsafe` because it dereferences raw pointers into the
    //   process-wide `STATE` singleton, which Rust cannot validate.
    // - `STATE` is only mutated here, during boot sequencing, before any other
    //   code observes it.
    unsafe {
        let tss = &mut *STATE.tss.get();
        *tss = Tss::new();
        tss.set_esp0(current_esp);
        tss.set_ss0(KERNEL_DATA_SELECTOR as u32);

        let mut gdt = Gdt::new();

        let kernel_cs_index = gdt.len();
        gdt.push_back(SegmentDescriptor::new(
            0, LIMIT_MAX, true, true, 0, SegmentKind::CodeOrData, true, false, true, false,
        ));
        gdt.set_kernel_mode_cs(kernel_cs_index);

        let kernel_ds_index = gdt.len();
        gdt.push_back(SegmentDescriptor::new(
            0, LIMIT_MAX, true, true, 0, SegmentKind::CodeOrData, false, false, true, false,
        ));
        gdt.set_kernel_mode_ds(kernel_ds_index);

        let user_cs_index = gdt.len();
        gdt.push_back(SegmentDescriptor::new(
            0, LIMIT_MAX, true, true, 3, SegmentKind::CodeOrData, true, false, true, false,
        ));
        gdt.set_user_mode_cs(user_cs_index);

        let user_ds_index = gdt.len();
        gdt.push_back(SegmentDescriptor::new(
            0, LIMIT_MAX, true, true, 3, SegmentKind::CodeOrData, false, false, true, false,
        ));
        gdt.set_user_mode_ds(user_ds_index);

        let tss_index = gdt.len();
        let tss_base = tss.as_ptr() as u32;
        let tss_limit = (Tss::SIZE - 1) as u32;
        gdt.push_back(SegmentDescriptor::tss(tss_base, tss_limit));
        gdt.set_user_mode_tss(tss_index);

        gdt.load();

        *STATE.gdt.get() = Some(gdt);
    }

    INITIALIZED.store(true, Ordering::Release);
}

/// Returns whether GDT/TSS initialization has completed.
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Updates `esp0` in the loaded TSS for future ring-3 to ring-0 transitions.
pub fn set_kernel_esp0(esp0: u32) {
    // SAFETY:
    // - This requires `unsafe` because it dereferences raw pointers into the
    //   singleton TSS, which Rust cannot validate.
    // - `STATE.tss` is the singleton active TSS for this CPU.
    unsafe {
        (*STATE.tss.get()).set_esp0(esp0);
    }
}

/// Returns the current `esp0` value stored in the TSS.
pub fn kernel_esp0() -> u32 {
    // SAFETY:
    // - This requires `unsafe` because it dereferences raw pointers into the
    //   singleton TSS, which Rust cannot validate.
    // - Reading from the singleton TSS is safe; callers get a plain value copy.
    unsafe { (*STATE.tss.get()).esp0() }
}

/// Returns a snapshot copy of the active GDT entries, for introspection by
/// tests and diagnostics.
pub fn descriptor_snapshot() -> Vec<u64> {
    // SAFETY:
    // - This requires `unsafe` because it dereferences raw pointers into the
    //   singleton GDT, which Rust cannot validate.
    // - Reading the table into an owned `Vec` copy does not alias the original.
    unsafe {
        match &*STATE.gdt.get() {
            Some(gdt) => gdt.entries.iter().map(|d| d.raw()).collect(),
            None => Vec::new(),
        }
    }
}
