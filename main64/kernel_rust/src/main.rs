#![no_std]
#![no_main]

use core::fmt::Write;
use core::panic::PanicInfo;

use kaos_kernel::arch::{gdt, interrupts};
use kaos_kernel::drivers::screen::{Color, Screen};
use kaos_kernel::drivers::serial;
use kaos_kernel::logging;
use kaos_kernel::memory::{heap, pmm, vmm};

static BOOT_MESSAGE: &str = "KAOS kernel booted: GDT/TSS, IDT, and heap are online.";

/// Entry point, loaded by the boot stub at `.text.boot`.
///
/// Brings up the subsystems in dependency order: serial first so early
/// failures are visible, then the descriptor tables, then the memory
/// stack the heap allocator needs.
#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    serial::init();
    logging::init_log_facade();

    gdt::init();
    interrupts::init();

    pmm::init(false);
    vmm::init(false);
    heap::init();

    log::info!(target: "boot", "subsystems online");

    let mut screen = Screen::new();
    screen.clear();
    screen.set_colors(Color::White, Color::Black);
    let _ = writeln!(screen, "{}", BOOT_MESSAGE);

    interrupts::enable();

    loop {
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack, preserves_flags));
        }
    }
}

/// Production panic handler: reports the failure on screen, then halts.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let mut screen = Screen::new();
    screen.clear();
    screen.set_colors(Color::White, Color::Blue);

    let _ = writeln!(screen, "\n!!! KERNEL PANIC !!!\n");

    if let Some(location) = info.location() {
        let _ = writeln!(screen, "Location: {}:{}", location.file(), location.line());
    }

    if let Some(message) = info.message().as_str() {
        let _ = writeln!(screen, "Message: {}", message);
    }

    loop {
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack, preserves_flags));
        }
    }
}
