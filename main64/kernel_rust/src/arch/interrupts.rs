//! Interrupt Descriptor Table (IDT) and PIC/PIT wiring for 32-bit protected mode.
//!
//! Every one of the 256 vectors gets its own generated stub (see
//! [`interrupts_stubs`]) so the IDT can satisfy the "every entry points at a
//! distinct address" property. All 256 stubs funnel into the single
//! [`interrupt_dispatch`] handler below, which looks up a registered callback,
//! falls back to the fatal-exception banner for unhandled CPU faults, and
//! sends EOI for hardware IRQs.

use core::arch::asm;
use core::cell::UnsafeCell;
use core::mem::size_of;

use crate::arch::gdt::{KERNEL_CODE_SELECTOR, SegmentSelector};
use crate::arch::port::PortByte;

const IDT_ENTRIES: usize = 256;
const IRQ_BASE: u8 = 32;
pub const IRQ0_PIT_TIMER_VECTOR: u8 = IRQ_BASE;
pub const IRQ1_KEYBOARD_VECTOR: u8 = IRQ_BASE + 1;
pub const SYSCALL_INT80_VECTOR: u8 = 0x80;
pub const EXCEPTION_DIVIDE_ERROR: u8 = 0;
pub const EXCEPTION_INVALID_OPCODE: u8 = 6;
pub const EXCEPTION_DEVICE_NOT_AVAILABLE: u8 = 7;
pub const EXCEPTION_DOUBLE_FAULT: u8 = 8;
pub const EXCEPTION_GENERAL_PROTECTION: u8 = 13;
pub const EXCEPTION_PAGE_FAULT: u8 = 14;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;
const PIC_EOI: u8 = 0x20;

const PIC_ICW1_INIT: u8 = 0x10;
const PIC_ICW1_ICW4: u8 = 0x01;
const PIC_ICW4_8086: u8 = 0x01;

const PIT_COMMAND: u16 = 0x43;
const PIT_CHANNEL0: u16 = 0x40;
const PIT_MODE_RATE_GENERATOR: u8 = 0x36;
const PIT_INPUT_HZ: u32 = 1_193_182;
const VGA_TEXT_BUFFER: usize = 0xB8000;
const VGA_COLS: usize = 80;

/// Saved general-purpose register state, in the order the `pushad`
/// instruction lays it out on the stack (EAX pushed last, so it sits at the
/// highest address / last field here; EDI is pushed first and ends up at the
/// lowest address, matching `esp` right after `pushad`).
///
/// Layout contract:
/// - Must match the `pushad` used by every generated ISR stub.
/// - Any change requires synchronized updates in assembly and tests.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SavedRegisters {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

/// Hardware interrupt return frame for `iret` in 32-bit protected mode.
///
/// Layout contract:
/// - The CPU always pushes EIP, CS, EFLAGS. It additionally pushes ESP and SS
///   only when the interrupt crosses a privilege-level boundary (ring 3 to
///   ring 0); those two fields are therefore only meaningful for traps taken
///   from user mode and must not be read unconditionally.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct InterruptStackFrame {
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

/// `ESP`/`SS` as pushed by the CPU on a ring-3-to-ring-0 transition, directly
/// following an [`InterruptStackFrame`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct RingTransitionFrame {
    pub esp: u32,
    pub ss: u32,
}

impl InterruptStackFrame {
    /// Returns the CPU-pushed `esp`/`ss` pair, but only when `cs`'s RPL shows
    /// the interrupt actually crossed into ring 0 from user mode. The CPU
    /// does not push these fields for a same-ring interrupt, so reading them
    /// unconditionally would read whatever garbage follows on the stack.
    ///
    /// # Safety
    /// `self` must be the live frame built by the current interrupt's stub;
    /// the two words immediately after it must be valid to read, which only
    /// holds when `cs & 0x3 == 3` indicated a ring transition.
    pub unsafe fn ring_transition(&self) -> Option<RingTransitionFrame> {
        if self.cs & 0x3 != 3 {
            return None;
        }
        let tail = (self as *const Self).add(1) as *const RingTransitionFrame;
        Some(unsafe { *tail })
    }
}

#[path = "interrupts_stubs.rs"]
mod interrupts_stubs;

use interrupts_stubs::ISR_STUB_TABLE;

/// The full frame a generated stub builds on the stack before calling
/// [`interrupt_dispatch`]: saved registers, then the vector/error-code pair
/// the stub pushed, then whatever the CPU itself pushed.
#[repr(C)]
struct RawInterruptFrame {
    regs: SavedRegisters,
    vector: u32,
    error_code: u32,
    iret: InterruptStackFrame,
}

/// Gate type nibble for an [`IdtEntry`], mirroring the x86 32-bit IDT gate
/// descriptor encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateKind {
    Task32 = 0x5,
    Interrupt16 = 0x6,
    Trap16 = 0x7,
    Interrupt32 = 0xE,
    Trap32 = 0xF,
}

/// A single 64-bit packed IDT gate descriptor.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdtEntry {
    value: u64,
}

impl IdtEntry {
    pub const fn missing() -> Self {
        Self { value: 0 }
    }

    /// Builds a present gate descriptor. Gates built here are always marked
    /// present; there is no use case in this kernel for an absent-but-valid
    /// entry, so `fill_idt` relies on `missing()` for that instead.
    pub const fn new(handler_addr: u32, selector: SegmentSelector, kind: GateKind, ring: u8) -> Self {
        let mut value = 0u64;
        value |= (handler_addr as u64) & 0xFFFF;
        value |= (selector.raw() as u64) << 16;
        value |= (kind as u64) << 40;
        value |= ((ring as u64) & 0x3) << 45;
        value |= 1 << 47;
        value |= ((handler_addr as u64) >> 16) << 48;
        Self { value }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

/// The Interrupt Descriptor Table: exactly 256 gate descriptors.
pub struct Idt {
    entries: [IdtEntry; IDT_ENTRIES],
}

impl Idt {
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::missing(); IDT_ENTRIES],
        }
    }

    pub fn set(&mut self, vector: usize, entry: IdtEntry) -> bool {
        if vector >= IDT_ENTRIES {
            return false;
        }
        self.entries[vector] = entry;
        true
    }

    pub fn load(&self) {
        let ptr = IdtPointer {
            limit: (size_of::<IdtEntry>() * IDT_ENTRIES - 1) as u16,
            base: self.entries.as_ptr() as u32,
        };
        // SAFETY: `ptr` stays alive for the duration of the `lidt` call and
        // points at a correctly sized, 64-bit-packed descriptor table.
        unsafe {
            asm!(
                "lidt [{}]",
                in(reg) &ptr,
                options(readonly, nostack, preserves_flags)
            );
        }
    }
}

/// Wires every one of the 256 IDT entries to its generated stub. All vectors
/// are ring-0 trap gates except vector 128 (`int 0x80`), the sole ring-3 gate
/// reachable from user mode.
pub fn fill_idt(idt: &mut Idt) {
    for vector in 0..IDT_ENTRIES {
        // SAFETY: `ISR_STUB_TABLE` is populated by the assembly in
        // `interrupts_stubs` before any Rust code can observe it, and holds
        // exactly `IDT_ENTRIES` entries.
        let handler_addr = unsafe { ISR_STUB_TABLE[vector] };
        let ring = if vector == SYSCALL_INT80_VECTOR as usize { 3 } else { 0 };
        let selector = SegmentSelector::from_raw(KERNEL_CODE_SELECTOR);
        idt.set(vector, IdtEntry::new(handler_addr, selector, GateKind::Trap32, ring));
    }
}

type IrqHandler = fn(u8, &mut SavedRegisters) -> *mut SavedRegisters;

/// Holds the IDT and IRQ handler table behind `UnsafeCell` to avoid
/// `static mut` (which permits aliased `&mut` references and is unsound).
struct InterruptState {
    idt: UnsafeCell<Idt>,
    handlers: UnsafeCell<[Option<IrqHandler>; IDT_ENTRIES]>,
}

impl InterruptState {
    const fn new() -> Self {
        Self {
            idt: UnsafeCell::new(Idt::new()),
            handlers: UnsafeCell::new([None; IDT_ENTRIES]),
        }
    }
}

// Safety: The kernel is single-threaded (no SMP). The IDT is written only
// during init() before interrupts are enabled. IRQ handler slots are written
// with interrupts disabled and read from interrupt_dispatch in interrupt
// context; no concurrent mutation is possible.
unsafe impl Sync for InterruptState {}

static STATE: InterruptState = InterruptState::new();

/// Initialize the IDT and PIC for IRQ handling.
pub fn init() {
    disable();
    unsafe {
        let idt = &mut *STATE.idt.get();
        fill_idt(idt);
        idt.load();
    }
    remap_pic(IRQ_BASE, IRQ_BASE + 8);
    mask_pic();
    clear_irq_handlers();
}

/// Enable interrupts globally.
pub fn enable() {
    unsafe {
        asm!("sti", options(nomem, nostack, preserves_flags));
    }
}

/// Disable interrupts globally.
pub fn disable() {
    unsafe {
        asm!("cli", options(nomem, nostack, preserves_flags));
    }
}

/// Returns whether interrupts are currently enabled (IF flag set).
#[inline]
pub fn are_enabled() -> bool {
    let eflags: u32;
    // SAFETY:
    // - Reading EFLAGS via pushfd/pop is safe and does not modify flags.
    // - `eflags` is a plain register output.
    unsafe {
        asm!(
            "pushfd",
            "pop {}",
            out(reg) eflags,
            options(nomem, preserves_flags)
        );
    }
    (eflags & (1 << 9)) != 0
}

/// Returns whether a CPU exception vector pushes an error code on entry.
pub const fn exception_has_error_code(vector: u8) -> bool {
    matches!(vector, 8 | 10 | 11 | 12 | 13 | 14 | 17 | 21)
}

#[inline]
const fn hex_nibble_ascii(nibble: u8) -> u8 {
    if nibble < 10 {
        b'0' + nibble
    } else {
        b'a' + (nibble - 10)
    }
}

fn write_exception_banner(vector: u8, error_code: u32, frame: *const SavedRegisters) {
    let mut line = [b' '; VGA_COLS];
    line[0] = b'!';
    line[1] = b'!';
    line[2] = b' ';
    line[3] = b'E';
    line[4] = b'X';
    line[5] = b'C';
    line[6] = b' ';
    line[7] = b'v';
    line[8] = b'e';
    line[9] = b'c';
    line[10] = b'=';
    line[11] = hex_nibble_ascii((vector >> 4) & 0x0F);
    line[12] = hex_nibble_ascii(vector & 0x0F);
    line[13] = b' ';
    line[14] = b'e';
    line[15] = b'r';
    line[16] = b'r';
    line[17] = b'=';
    for i in 0..8 {
        let shift = (7 - i) * 4;
        line[18 + i] = hex_nibble_ascii(((error_code >> shift) & 0x0F) as u8);
    }
    line[27] = b' ';
    line[28] = b'f';
    line[29] = b'r';
    line[30] = b'm';
    line[31] = b'=';
    let frame_u32 = frame as u32;
    for i in 0..8 {
        let shift = (7 - i) * 4;
        line[32 + i] = hex_nibble_ascii(((frame_u32 >> shift) & 0x0F) as u8);
    }

    // SAFETY:
    // - VGA text memory is MMIO-mapped at `VGA_TEXT_BUFFER`.
    // - We only write one in-bounds row (0..80 cells).
    // - Volatile writes are required for MMIO ordering/visibility.
    unsafe {
        for (col, ch) in line.iter().enumerate() {
            let cell = VGA_TEXT_BUFFER + col * 2;
            core::ptr::write_volatile(cell as *mut u8, *ch);
            core::ptr::write_volatile((cell + 1) as *mut u8, 0x4F);
        }
    }
}

/// Fatal exception sink for CPU faults with no registered handler.
fn fatal_exception(vector: u8, error_code: u32, regs: &SavedRegisters, iret: &InterruptStackFrame) -> ! {
    crate::drivers::serial::_debug_print(format_args!(
        "FATAL EXCEPTION vec=0x{:02x} err=0x{:08x} eip=0x{:08x} cs=0x{:08x} eflags=0x{:08x} eax=0x{:08x}\n",
        vector, error_code, iret.eip, iret.cs, iret.eflags, regs.eax
    ));
    write_exception_banner(vector, error_code, regs as *const SavedRegisters);

    loop {
        // SAFETY:
        // - We are in a fatal exception path and intentionally stop forward progress.
        // - `cli; hlt` is the standard terminal halt sequence for kernel panic/fault sinks.
        unsafe {
            asm!("cli", "hlt", options(nomem, nostack, preserves_flags));
        }
    }
}

/// Register a callback for a given interrupt vector.
pub fn register_irq_handler(vector: u8, handler: IrqHandler) {
    unsafe {
        let handlers = &mut *STATE.handlers.get();
        handlers[vector as usize] = Some(handler);
    }
}

pub fn clear_irq_handlers() {
    unsafe {
        let handlers = &mut *STATE.handlers.get();
        for slot in handlers.iter_mut() {
            *slot = None;
        }
    }
}

fn remap_pic(offset1: u8, offset2: u8) {
    unsafe {
        let cmd1 = PortByte::new(PIC1_COMMAND);
        let cmd2 = PortByte::new(PIC2_COMMAND);
        let data1 = PortByte::new(PIC1_DATA);
        let data2 = PortByte::new(PIC2_DATA);

        let icw1 = PIC_ICW1_INIT | PIC_ICW1_ICW4;
        cmd1.write(icw1);
        io_wait();
        cmd2.write(icw1);
        io_wait();

        data1.write(offset1);
        io_wait();
        data2.write(offset2);
        io_wait();

        data1.write(0x04);
        io_wait();
        data2.write(0x02);
        io_wait();

        data1.write(PIC_ICW4_8086);
        io_wait();
        data2.write(PIC_ICW4_8086);
        io_wait();
    }
}

/// Small I/O delay by writing to port 0x80 (POST diagnostic port).
/// This gives the PIC ~1 us to settle between commands, which is
/// necessary on real hardware but harmless on emulators.
#[inline]
fn io_wait() {
    unsafe {
        PortByte::new(0x80).write(0);
    }
}

fn mask_pic() {
    unsafe {
        let data1 = PortByte::new(PIC1_DATA);
        let data2 = PortByte::new(PIC2_DATA);

        data1.write(0xFC); // Unmask IRQ0 + IRQ1.
        data2.write(0xFF); // Mask all slave IRQs.
    }
}

fn end_of_interrupt(irq: u8) {
    unsafe {
        if irq >= 8 {
            PortByte::new(PIC2_COMMAND).write(PIC_EOI);
        }
        PortByte::new(PIC1_COMMAND).write(PIC_EOI);
    }
}

/// Computes the PIT divisor for the requested interrupt frequency.
///
/// Returns 0 for `hz == 0` so callers can decide how to handle invalid input.
pub const fn pit_divisor_for_hz(hz: u32) -> u16 {
    if hz == 0 {
        return 0;
    }

    let divisor = PIT_INPUT_HZ / hz;
    if divisor == 0 {
        1
    } else if divisor > u16::MAX as u32 {
        u16::MAX
    } else {
        divisor as u16
    }
}

/// Programs PIT channel 0 as periodic timer with the given frequency.
pub fn init_periodic_timer(hz: u32) {
    let divisor = pit_divisor_for_hz(hz);
    if divisor == 0 {
        return;
    }

    // SAFETY:
    // - Writing PIT command/data ports is required to program channel 0.
    // - Caller controls when to initialize; this routine only performs I/O port writes.
    unsafe {
        let cmd = PortByte::new(PIT_COMMAND);
        let data = PortByte::new(PIT_CHANNEL0);
        cmd.write(PIT_MODE_RATE_GENERATOR);
        data.write((divisor & 0xFF) as u8);
        data.write((divisor >> 8) as u8);
    }
}

/// Single dispatch entry point called from every generated ISR stub.
///
/// Looks up a registered callback for the vector; falls back to the fatal
/// exception path for CPU faults nobody claimed, and to a silent no-op for
/// stray hardware IRQs. Vector 14 (page fault) is special-cased to read
/// `cr2`, since that is the only way to recover the faulting address on x86.
///
/// # Safety
/// - Must be called only from a generated ISR stub with `frame` pointing at
///   the live register-save area built by that stub's `pushad`.
/// - Must not be called reentrantly — the stub does not execute `iret`
///   until this function returns.
#[no_mangle]
pub unsafe extern "C" fn interrupt_dispatch(frame: *mut SavedRegisters) -> *mut SavedRegisters {
    // SAFETY: `frame` is the address of a `RawInterruptFrame` built by the
    // calling stub: saved registers followed by vector, error code, and the
    // CPU-pushed return frame, in that order.
    let raw = unsafe { &mut *(frame as *mut RawInterruptFrame) };
    let vector = raw.vector as u8;
    let error_code = raw.error_code;

    if vector == EXCEPTION_PAGE_FAULT {
        let faulting_address: u32;
        // SAFETY: CR2 holds the linear address that caused the most recent
        // page fault; reading it does not modify processor state.
        unsafe {
            asm!("mov {}, cr2", out(reg) faulting_address, options(nomem, nostack, preserves_flags));
        }
        crate::memory::vmm::handle_page_fault(faulting_address, error_code);
    }

    let handler = {
        let handlers = &*STATE.handlers.get();
        handlers[vector as usize]
    };

    let next_frame = if let Some(handler) = handler {
        handler(vector, &mut raw.regs)
    } else if (IRQ_BASE..IRQ_BASE + 16).contains(&vector) || vector == EXCEPTION_PAGE_FAULT {
        frame
    } else {
        fatal_exception(vector, error_code, &raw.regs, &raw.iret)
    };

    if (IRQ_BASE..IRQ_BASE + 16).contains(&vector) {
        end_of_interrupt(vector - IRQ_BASE);
    }

    next_frame
}

const _: () = {
    assert!(size_of::<SavedRegisters>() == 8 * 4);
};

const _: () = {
    assert!(size_of::<InterruptStackFrame>() == 3 * 4);
};
