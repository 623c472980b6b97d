//! Generated assembly trampolines for all 256 interrupt vectors.
//!
//! Every vector gets a distinct stub so [`fill_idt`](super::fill_idt) can
//! point each IDT entry at a unique address (required by the IDT-vector-128
//! testable property: every entry must point at a *distinct* stub). Hand
//! writing 256 near-identical blocks would dwarf the rest of this module, so
//! the stubs are emitted by a GAS `.altmacro`/`.rept` loop instead. Only the
//! eight vectors the CPU itself pushes an error code for (8, 10-14, 17, 21)
//! skip the dummy push; every other stub pushes a 0 so the handler always
//! sees the same frame shape.

use core::arch::global_asm;

extern "C" {
    /// Table of the 256 stub entry addresses, populated by the assembly
    /// below in vector order. Read by [`super::fill_idt`].
    pub static ISR_STUB_TABLE: [u32; 256];
}

global_asm!(
    r#"
    .altmacro
    .section .text

    # Pushes the CPU-equalised frame, reloads the kernel data segment, and
    # calls the single Rust dispatch handler with a pointer to it.
    .macro isr_common vec has_err
    .global isr_stub_\vec
    .type isr_stub_\vec, @function
isr_stub_\vec:
    .if \has_err == 0
    push $0
    .endif
    push $\vec
    pushad
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    push esp
    call interrupt_dispatch
    add esp, 4
    mov esp, eax
    popad
    add esp, 8
    iret
    .endm

    .macro isr_gen vec
    .if (\vec==8)|(\vec==10)|(\vec==11)|(\vec==12)|(\vec==13)|(\vec==14)|(\vec==17)|(\vec==21)
    isr_common \vec, 1
    .else
    isr_common \vec, 0
    .endif
    .endm

    .set i, 0
    .rept 256
    isr_gen %i
    .set i, i+1
    .endr

    .section .rodata
    .global ISR_STUB_TABLE
    .type ISR_STUB_TABLE, @object
ISR_STUB_TABLE:
    .set i, 0
    .rept 256
    .long isr_stub_%i
    .set i, i+1
    .endr
"#,
);
