//! `__cxa_atexit`/`__cxa_finalize`: registration and (on request)
//! invocation of destructors for function-local and namespace-scope
//! statics, and `DSO` (shared object) teardown.
//!
//! Supplements spec.md, which does not mention `atexit` at all; grounded
//! in `original_source/stdlib/cpp/cxxabi.cpp`'s `atexit_func_list` and
//! `__cxa_finalize`, which walks the list in reverse registration order,
//! optionally filtered by a `dso_handle`.

use alloc::vec::Vec;

/// One registered destructor: the function pointer, the opaque argument
/// GCC passes it (usually `&static_var`), and the DSO handle it belongs
/// to. This kernel links everything into one image, so `dso_handle` is
/// only meaningful as an opt-in filter for `cxa_finalize` — not as a real
/// shared-object identity.
#[derive(Clone, Copy)]
pub struct AtExitEntry {
    pub destructor: unsafe extern "C" fn(*mut u8),
    pub arg: *mut u8,
    pub dso_handle: *mut u8,
}

// SAFETY: entries are only ever run under `AtExitRegistry`'s exclusive
// access (a `spin::Mutex` at the singleton call site); the raw pointers
// themselves are inert data until then.
unsafe impl Send for AtExitEntry {}

/// Registration order matters: `cxa_finalize` must run destructors in
/// reverse of the order they were registered, matching C++'s reverse
/// static-destruction order.
pub struct AtExitRegistry {
    entries: Vec<AtExitEntry>,
}

impl AtExitRegistry {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// `__cxa_atexit`. The real ABI returns `c_int` (0 on success,
    /// nonzero on failure — e.g. an allocator out of memory); this
    /// signature mirrors that rather than panicking, since a failed
    /// `atexit` registration is a recoverable condition a caller may
    /// want to react to.
    pub fn register(&mut self, destructor: unsafe extern "C" fn(*mut u8), arg: *mut u8, dso_handle: *mut u8) -> i32 {
        self.entries.push(AtExitEntry {
            destructor,
            arg,
            dso_handle,
        });
        0
    }

    /// `__cxa_finalize`. `dso_handle == null` finalizes everything,
    /// matching the ABI's documented meaning of a null handle. Entries
    /// run in reverse registration order; each run entry is removed so a
    /// second `finalize` call (e.g. at a later shutdown stage) does not
    /// re-run it.
    pub fn finalize(&mut self, dso_handle: *mut u8) {
        let mut i = self.entries.len();
        while i > 0 {
            i -= 1;
            let matches = dso_handle.is_null() || self.entries[i].dso_handle == dso_handle;
            if matches {
                let entry = self.entries.remove(i);
                // SAFETY: `entry.destructor`/`entry.arg` were supplied by
                // the registering call site, which is responsible for
                // their validity for the lifetime of the program.
                unsafe {
                    (entry.destructor)(entry.arg);
                }
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for AtExitRegistry {
    fn default() -> Self {
        Self::new()
    }
}
