//! GDT/TSS Integration Tests
//!
//! Validates the ring-3 foundation descriptors and TSS state wiring.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kaos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use kaos_kernel::arch::gdt;

/// Entry point for the GDT/TSS test kernel.
#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    kaos_kernel::drivers::serial::init();
    gdt::init();

    test_main();

    loop {
        core::hint::spin_loop();
    }
}

/// Panic handler for integration tests.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kaos_kernel::testing::test_panic_handler(info)
}

/// Contract: selector constants follow expected protected-mode layout.
/// Given: The subsystem is initialized with the explicit preconditions in this test body, including any literal addresses, vectors, sizes, flags, and constants used below.
/// When: The exact operation sequence in this function is executed against that state.
/// Then: All assertions must hold for the checked values and state transitions, preserving the contract "selector constants follow expected protected-mode layout".
/// Failure Impact: Indicates a regression in subsystem behavior, ABI/layout, synchronization, or lifecycle semantics and should be treated as release-blocking until understood.
#[test_case]
fn test_selector_constants() {
    assert_eq!(gdt::KERNEL_CODE_SELECTOR, 0x08);
    assert_eq!(gdt::KERNEL_DATA_SELECTOR, 0x10);
    assert_eq!(gdt::USER_CODE_SELECTOR, 0x1B);
    assert_eq!(gdt::USER_DATA_SELECTOR, 0x23);
    assert_eq!(gdt::TSS_SELECTOR, 0x28);
}

/// Contract: gdt init loads tss descriptor and kernel esp0.
/// Given: The subsystem is initialized with the explicit preconditions in this test body, including any literal addresses, vectors, sizes, flags, and constants used below.
/// When: The exact operation sequence in this function is executed against that state.
/// Then: All assertions must hold for the checked values and state transitions, preserving the contract "gdt init loads tss descriptor and kernel esp0".
/// Failure Impact: Indicates a regression in subsystem behavior, ABI/layout, synchronization, or lifecycle semantics and should be treated as release-blocking until understood.
#[test_case]
fn test_tss_descriptor_present_and_esp0_nonzero() {
    assert!(gdt::is_initialized(), "GDT/TSS must be initialized");

    let descriptors = gdt::descriptor_snapshot();
    let tss = descriptors[5];

    let tss_type = (tss >> 40) & 0x0F;
    let present = (tss >> 47) & 0x01;
    let base = ((tss >> 16) & 0xFF_FFFF) | (((tss >> 56) & 0xFF) << 24);

    assert_eq!(tss_type, 0x9, "TSS descriptor type must be available 32-bit TSS");
    assert_eq!(present, 1, "TSS descriptor must be marked present");
    assert_ne!(base, 0, "TSS base address must be non-zero");

    let esp0 = gdt::kernel_esp0();
    assert_ne!(esp0, 0, "TSS ESP0 must be initialized");
}

/// Contract: kernel esp0 setter updates tss state.
/// Given: The subsystem is initialized with the explicit preconditions in this test body, including any literal addresses, vectors, sizes, flags, and constants used below.
/// When: The exact operation sequence in this function is executed against that state.
/// Then: All assertions must hold for the checked values and state transitions, preserving the contract "kernel esp0 setter updates tss state".
/// Failure Impact: Indicates a regression in subsystem behavior, ABI/layout, synchronization, or lifecycle semantics and should be treated as release-blocking until understood.
#[test_case]
fn test_set_kernel_esp0_roundtrip() {
    let old_esp0 = gdt::kernel_esp0();
    let test_esp0 = 0x0012_3000u32;

    gdt::set_kernel_esp0(test_esp0);
    assert_eq!(gdt::kernel_esp0(), test_esp0);

    gdt::set_kernel_esp0(old_esp0);
}

/// Contract: the gdt snapshot contains exactly six entries: the mandatory
/// null descriptor plus kernel code/data, user code/data, and the TSS.
/// Given: The subsystem is initialized with the explicit preconditions in this test body, including any literal addresses, vectors, sizes, flags, and constants used below.
/// When: The exact operation sequence in this function is executed against that state.
/// Then: All assertions must hold for the checked values and state transitions, preserving the contract "the gdt snapshot contains exactly six entries".
/// Failure Impact: Indicates a regression in subsystem behavior, ABI/layout, synchronization, or lifecycle semantics and should be treated as release-blocking until understood.
#[test_case]
fn test_descriptor_snapshot_len_and_null_entry() {
    let descriptors = gdt::descriptor_snapshot();
    assert_eq!(descriptors.len(), 6);
    assert_eq!(descriptors[0], 0, "entry 0 must remain the null descriptor");
}
