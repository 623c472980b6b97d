//! Exception object lifecycle: allocation, `throw`, `rethrow`,
//! `begin_catch`/`end_catch`.
//!
//! The pure bookkeeping (handler-count nesting, uncaught-exception
//! counting, destructor ordering) is expressed as free functions taking an
//! explicit `&mut GlobalEhState` and `&dyn Unwinder`, so it is unit
//! testable without any real stack unwinding. [`super::abi`] wires these
//! against the process-wide singleton and the `#[no_mangle] extern "C"`
//! Itanium names.

use core::mem::size_of;
use core::sync::atomic::{AtomicBool, Ordering};

use alloc::alloc::{alloc, dealloc, Layout};

use super::unwind::{Unwinder, UnwindHeader, UnwindReasonCode};
use crate::error::AllocError;
use crate::rtti::TypeInfo;

/// Canonical Itanium C++ ABI vendor/language tag, `"GNUCC++\0"` packed
/// big-endian into a 64-bit value (see `SPEC_FULL.md` §9's first Open
/// Question: this follows the canonical ordering rather than the source's
/// apparently reversed packing).
pub const GNU_CXX_EXCEPTION_CLASS: u64 = u64::from_be_bytes(*b"GNUCC++\0");

const FALLBACK_BUF_SIZE: usize = 256;

/// `{type_info, destructor, handler_count, uncaught_next, adjusted_ptr,
/// terminate_handler, unexpected_handler}` from spec §3.3, plus the
/// allocation bookkeeping (`payload_size`, `from_fallback`) this
/// implementation needs to free itself correctly. Field order beyond the
/// first seven is not meant to match any particular compiler's emitted
/// layout byte-for-byte; no external object code links against this
/// struct in this repository.
#[repr(C)]
pub struct AbiHeader {
    pub type_info: *const TypeInfo,
    pub destructor: Option<unsafe extern "C" fn(*mut u8)>,
    pub handler_count: i32,
    pub uncaught_next: *mut ExceptionHeader,
    pub adjusted_ptr: *mut u8,
    pub terminate_handler: Option<unsafe extern "C" fn() -> !>,
    pub unexpected_handler: Option<unsafe extern "C" fn()>,
    payload_size: usize,
    from_fallback: bool,
}

#[repr(C)]
pub struct ExceptionHeader {
    pub abi: AbiHeader,
    pub unwind: UnwindHeader,
}

const HEADER_SIZE: usize = size_of::<ExceptionHeader>();

static FALLBACK_BUF: spin::Mutex<[u8; FALLBACK_BUF_SIZE]> = spin::Mutex::new([0u8; FALLBACK_BUF_SIZE]);
static FALLBACK_IN_USE: AtomicBool = AtomicBool::new(false);

/// Returns a pointer to a payload region immediately following a
/// zero-initialised [`AbiHeader`]. Uses the heap; falls back to a single
/// static bounded buffer on heap exhaustion; if `size` exceeds that
/// buffer too, calls `terminate` (aborts — there is no recovery from being
/// unable to represent the exception object at all).
pub fn alloc_exception(size: usize) -> *mut u8 {
    try_alloc_exception(size).unwrap_or_else(|_| terminate())
}

/// Same allocation strategy as [`alloc_exception`], surfaced as an
/// [`AllocError`] rather than an unconditional `terminate` so the two
/// distinct failure causes (heap exhausted vs. the fallback buffer itself
/// too small for `size`) are observable by a caller willing to recover,
/// e.g. a future host-side caller that wants to retry with a smaller
/// payload instead of aborting the process outright.
fn try_alloc_exception(size: usize) -> Result<*mut u8, AllocError> {
    let total = HEADER_SIZE + size;
    let layout = Layout::from_size_align(total, core::mem::align_of::<ExceptionHeader>())
        .expect("exception allocation size overflow");

    // SAFETY: `layout` has non-zero size (HEADER_SIZE alone is non-zero).
    let heap_ptr = unsafe { alloc(layout) };
    if !heap_ptr.is_null() {
        let header = heap_ptr as *mut ExceptionHeader;
        init_header(header, size, false);
        return Ok(payload_of(header));
    }

    if total > FALLBACK_BUF_SIZE {
        return Err(AllocError::FallbackBufferTooSmall);
    }

    if FALLBACK_IN_USE
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(AllocError::HeapExhausted);
    }

    let header = FALLBACK_BUF.lock().as_mut_ptr() as *mut ExceptionHeader;
    init_header(header, size, true);
    Ok(payload_of(header))
}

fn init_header(header: *mut ExceptionHeader, payload_size: usize, from_fallback: bool) {
    // SAFETY: `header` points at `HEADER_SIZE + payload_size` freshly
    // allocated (or exclusively claimed fallback) bytes.
    unsafe {
        core::ptr::write(
            header,
            ExceptionHeader {
                abi: AbiHeader {
                    type_info: core::ptr::null(),
                    destructor: None,
                    handler_count: 0,
                    uncaught_next: core::ptr::null_mut(),
                    adjusted_ptr: core::ptr::null_mut(),
                    terminate_handler: None,
                    unexpected_handler: None,
                    payload_size,
                    from_fallback,
                },
                unwind: UnwindHeader {
                    exception_class: 0,
                    exception_cleanup: None,
                    private_1: 0,
                    private_2: 0,
                },
            },
        );
    }
}

fn payload_of(header: *mut ExceptionHeader) -> *mut u8 {
    // SAFETY: payload immediately follows the header in the same allocation.
    unsafe { (header as *mut u8).add(HEADER_SIZE) }
}

pub fn header_of(payload_ptr: *mut u8) -> *mut ExceptionHeader {
    // SAFETY: every payload pointer this crate hands out was produced by
    // `payload_of` above, i.e. is `HEADER_SIZE` bytes past its header.
    unsafe { payload_ptr.sub(HEADER_SIZE) as *mut ExceptionHeader }
}

/// Recovers the enclosing [`ExceptionHeader`] from the `unwind` field
/// pointer the unwinder and personality routine pass around (`cxa_throw`
/// hands the unwinder `&header.unwind`, not `header` itself, matching the
/// real `_Unwind_Exception` convention). `unwind_header` must be the
/// `unwind` field of a header this crate allocated.
pub fn header_of_unwind(unwind_header: *mut UnwindHeader) -> *mut ExceptionHeader {
    // SAFETY: caller contract above; `unwind` is always the second field.
    unsafe { (unwind_header as *mut u8).sub(size_of::<AbiHeader>()) as *mut ExceptionHeader }
}

/// Frees the heap backing; a no-op if `payload_ptr` came from the static
/// fallback buffer (freeing that just releases the single global slot).
pub fn free_exception(payload_ptr: *mut u8) {
    let header = header_of(payload_ptr);
    // SAFETY: `header` was written by `init_header`.
    let from_fallback = unsafe { (*header).abi.from_fallback };
    let payload_size = unsafe { (*header).abi.payload_size };

    if from_fallback {
        FALLBACK_IN_USE.store(false, Ordering::Release);
        return;
    }

    let layout = Layout::from_size_align(HEADER_SIZE + payload_size, core::mem::align_of::<ExceptionHeader>())
        .expect("exception allocation size overflow");
    // SAFETY: `header` was allocated with this exact layout by `alloc_exception`.
    unsafe { dealloc(header as *mut u8, layout) };
}

fn terminate() -> ! {
    panic!("freestd::cxxabi: terminate() called (unrecoverable exception-runtime state)");
}

/// Process-wide exception-handling state: the caught-exception stack and
/// the count of exceptions currently in flight (thrown but not yet fully
/// handled). One instance per logical thread under the single-threaded
/// assumption this repository documents (§5); a multi-CPU port would key
/// this per-core instead.
pub struct GlobalEhState {
    caught_stack: Option<*mut ExceptionHeader>,
    uncaught_count: u32,
}

// SAFETY: raw pointers to heap/fallback-buffer exception headers are only
// ever dereferenced while this state's owner holds exclusive access
// (enforced by the caller wrapping this in a lock, see `abi.rs`).
unsafe impl Send for GlobalEhState {}

impl GlobalEhState {
    pub const fn new() -> Self {
        Self {
            caught_stack: None,
            uncaught_count: 0,
        }
    }

    pub fn uncaught_count(&self) -> u32 {
        self.uncaught_count
    }
}

impl Default for GlobalEhState {
    fn default() -> Self {
        Self::new()
    }
}

/// `__cxa_throw`: populate the header, tag it for this runtime, hand it to
/// the unwinder. Diverges: either the unwinder finds a handler (never
/// returns here) or it returns having found none, in which case this calls
/// `terminate`.
pub fn cxa_throw<U: Unwinder>(
    state: &mut GlobalEhState,
    unwinder: &U,
    header: *mut ExceptionHeader,
    type_info: *const TypeInfo,
    destructor: Option<unsafe extern "C" fn(*mut u8)>,
) -> ! {
    // SAFETY: `header` was produced by `alloc_exception`.
    unsafe {
        (*header).abi.type_info = type_info;
        (*header).abi.destructor = destructor;
        (*header).unwind.exception_cleanup = Some(exception_cleanup_trampoline);
        (*header).unwind.exception_class = GNU_CXX_EXCEPTION_CLASS;
    }

    state.uncaught_count += 1;

    // SAFETY: `header` outlives this call; the unwinder either diverges
    // into the matched landing pad or returns control here.
    let unwind_header = unsafe { &mut (*header).unwind };
    let reason = unwinder.raise(unwind_header);
    debug_assert!(
        matches!(reason, UnwindReasonCode::EndOfStack | UnwindReasonCode::ContinueUnwind | UnwindReasonCode::NoReason),
        "raise() should only return when no handler was found"
    );
    terminate();
}

/// `__cxa_rethrow`: re-raise the exception currently on top of the caught
/// stack. Terminates if there is no such exception.
pub fn cxa_rethrow<U: Unwinder>(state: &mut GlobalEhState, unwinder: &U) -> ! {
    let Some(header) = state.caught_stack else {
        terminate();
    };

    state.uncaught_count += 1;
    // SAFETY: `header` is the top of the caught stack, still allocated.
    unsafe {
        (*header).abi.handler_count = -(*header).abi.handler_count.abs();
    }

    let unwind_header = unsafe { &mut (*header).unwind };
    let reason = unwinder.resume_or_rethrow(unwind_header);
    debug_assert!(
        matches!(reason, UnwindReasonCode::EndOfStack | UnwindReasonCode::ContinueUnwind | UnwindReasonCode::NoReason),
        "resume_or_rethrow() should only return when no handler was found"
    );
    terminate();
}

/// `__cxa_begin_catch`: moves the exception onto the caught stack and
/// returns the adjusted payload pointer the `catch` clause should bind.
pub fn cxa_begin_catch(state: &mut GlobalEhState, header: *mut ExceptionHeader) -> *mut u8 {
    // SAFETY: `header` came from the personality routine's landing-pad
    // installation, which only ever names a header this crate allocated.
    unsafe {
        if (*header).abi.handler_count < 0 {
            (*header).abi.handler_count = -(*header).abi.handler_count + 1;
        } else {
            (*header).abi.handler_count += 1;
        }
    }

    if state.caught_stack != Some(header) {
        // SAFETY: linking this header onto the front of the caught stack;
        // `uncaught_next` is this crate's own intrusive-list field.
        unsafe {
            (*header).abi.uncaught_next = state.caught_stack.unwrap_or(core::ptr::null_mut());
        }
        state.caught_stack = Some(header);
    }

    state.uncaught_count = state.uncaught_count.saturating_sub(1);

    // SAFETY: `adjusted_ptr` was set by the personality routine before
    // transferring control to the landing pad that calls this function.
    unsafe { (*header).abi.adjusted_ptr }
}

/// `__cxa_end_catch`: decrements the handler count; once it reaches zero,
/// pops the exception and asks the unwinder to delete it (invoking the
/// destructor via `exception_cleanup`).
pub fn cxa_end_catch<U: Unwinder>(state: &mut GlobalEhState, unwinder: &U) {
    let Some(header) = state.caught_stack else {
        return;
    };

    // SAFETY: `header` is the top of the caught stack.
    let count = unsafe { (*header).abi.handler_count };
    let reached_zero_from_negative = count < 0 && count + 1 == 0;
    let new_count = if count < 0 { count + 1 } else { count - 1 };

    // SAFETY: same header as above.
    unsafe {
        (*header).abi.handler_count = new_count;
    }

    if new_count != 0 {
        return;
    }

    // SAFETY: popping the header we just finished with off the stack.
    state.caught_stack = unsafe {
        let next = (*header).abi.uncaught_next;
        if next.is_null() {
            None
        } else {
            Some(next)
        }
    };

    if !reached_zero_from_negative {
        let unwind_header = unsafe { &mut (*header).unwind };
        unwinder.delete_exception(unwind_header);
    }
}

/// Invoked by the unwinder once an exception is fully done with (either
/// `end_catch` asked for deletion, or the exception propagated past the
/// end of the stack unhandled): runs the stored destructor (if any), then
/// frees the backing allocation.
pub extern "C" fn exception_cleanup_trampoline(_reason: UnwindReasonCode, unwind_header: *mut UnwindHeader) {
    let header = header_of_unwind(unwind_header);
    // SAFETY: `header` was recovered from a header this crate allocated.
    unsafe {
        if let Some(destructor) = (*header).abi.destructor {
            destructor(payload_of(header));
        }
        free_exception(payload_of(header));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    static DESTRUCTOR_CALLS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn counting_destructor(_payload: *mut u8) {
        DESTRUCTOR_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    struct MockUnwinder;
    impl Unwinder for MockUnwinder {
        fn raise(&self, _exc: &mut UnwindHeader) -> UnwindReasonCode {
            UnwindReasonCode::EndOfStack
        }
        fn resume_or_rethrow(&self, _exc: &mut UnwindHeader) -> UnwindReasonCode {
            UnwindReasonCode::EndOfStack
        }
        fn delete_exception(&self, exc: &mut UnwindHeader) {
            if let Some(cleanup) = exc.exception_cleanup {
                cleanup(UnwindReasonCode::NoReason, exc as *mut UnwindHeader);
            }
        }
    }

    /// Simulates what the personality routine does on a successful catch:
    /// allocate, mark caught (as if a landing pad just ran), then release.
    /// Checks handler-count nesting, the uncaught counter, and that the
    /// destructor fires exactly once on `end_catch`.
    #[test]
    fn catch_then_end_catch_decrements_uncaught_and_runs_destructor() {
        DESTRUCTOR_CALLS.store(0, Ordering::SeqCst);
        let mut state = GlobalEhState::new();
        let unwinder = MockUnwinder;

        let payload = alloc_exception(0);
        let header = header_of(payload);
        unsafe {
            (*header).abi.destructor = Some(counting_destructor);
            (*header).abi.adjusted_ptr = payload;
        }
        state.uncaught_count = 1;

        let adjusted = cxa_begin_catch(&mut state, header);
        assert_eq!(adjusted, payload);
        assert_eq!(state.uncaught_count(), 0);

        cxa_end_catch(&mut state, &unwinder);
        assert_eq!(DESTRUCTOR_CALLS.load(Ordering::SeqCst), 1);
        assert!(state.caught_stack.is_none());
    }

    /// Nested `begin_catch` on the same header (the re-entrant catch
    /// handler case) must not pop until every `end_catch` has balanced it.
    #[test]
    fn nested_begin_catch_requires_matching_end_catch_count() {
        DESTRUCTOR_CALLS.store(0, Ordering::SeqCst);
        let mut state = GlobalEhState::new();
        let unwinder = MockUnwinder;

        let payload = alloc_exception(0);
        let header = header_of(payload);
        unsafe {
            (*header).abi.destructor = Some(counting_destructor);
            (*header).abi.adjusted_ptr = payload;
        }
        state.uncaught_count = 1;

        cxa_begin_catch(&mut state, header);
        cxa_begin_catch(&mut state, header);

        cxa_end_catch(&mut state, &unwinder);
        assert_eq!(DESTRUCTOR_CALLS.load(Ordering::SeqCst), 0, "still one handler outstanding");

        cxa_end_catch(&mut state, &unwinder);
        assert_eq!(DESTRUCTOR_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fallback_buffer_is_reused_after_free() {
        // Exhausting the heap path is not reproducible from a host test,
        // but the fallback slot's exclusivity flag must still round-trip.
        let payload = alloc_exception(4);
        let header = header_of(payload);
        assert!(!unsafe { (*header).abi.from_fallback });
        free_exception(payload);
    }
}
