//! `__cxa_guard_*`: the once-only initialisation guard GCC emits around a
//! function-local `static` with a non-trivial constructor.
//!
//! The declared Non-goal is re-entrant/thread-contended initialisation —
//! this repository targets a single-threaded kernel — but the guard byte
//! is still backed by an atomic rather than a plain `u8` so a debug build
//! built with interrupts enabled during initialisation can't silently
//! corrupt it from a re-entrant IRQ handler.

use core::sync::atomic::{AtomicU8, Ordering};

const UNINITIALIZED: u8 = 0;
const INITIALIZED: u8 = 1;
const IN_PROGRESS: u8 = 2;

/// One per guarded static, emitted by the compiler as a single byte (the
/// ABI only defines the first byte as the "initialized" flag; the
/// remaining bytes of the full 64-bit guard word are unused on every
/// target this repository builds for).
#[repr(transparent)]
pub struct Guard(AtomicU8);

impl Guard {
    pub const fn new() -> Self {
        Self(AtomicU8::new(UNINITIALIZED))
    }
}

impl Default for Guard {
    fn default() -> Self {
        Self::new()
    }
}

/// `__cxa_guard_acquire`: returns `true` if the caller should run the
/// guarded initializer (and must follow up with `release` or `abort`).
/// Returns `false` if another caller already completed initialization.
///
/// Re-entrant acquisition (the guarded initializer itself triggering
/// another acquire on the same guard, e.g. via recursive static init) is
/// a contract violation in a single-threaded program and is reported via
/// `debug_assert!` rather than silently handled.
pub fn guard_acquire(guard: &Guard) -> bool {
    match guard.0.compare_exchange(
        UNINITIALIZED,
        IN_PROGRESS,
        Ordering::Acquire,
        Ordering::Acquire,
    ) {
        Ok(_) => true,
        Err(INITIALIZED) => false,
        Err(IN_PROGRESS) => {
            debug_assert!(false, "recursive re-entry into a guarded static initializer");
            false
        }
        Err(other) => unreachable!("invalid guard state {other}"),
    }
}

/// `__cxa_guard_release`: marks initialization complete.
pub fn guard_release(guard: &Guard) {
    guard.0.store(INITIALIZED, Ordering::Release);
}

/// `__cxa_guard_abort`: the initializer threw; reset to uninitialized so a
/// later call can retry.
pub fn guard_abort(guard: &Guard) {
    guard.0.store(UNINITIALIZED, Ordering::Release);
}
