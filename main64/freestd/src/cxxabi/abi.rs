//! Process-wide singletons and the fixed-name `extern "C"` surface a
//! compiler's generated landing-pad code calls directly. Everything here
//! is a thin, `#[no_mangle]` forwarding layer over the pure functions in
//! the sibling modules — keep logic changes there, not here.

use crate::rtti::TypeInfo;

use super::atexit::AtExitRegistry;
use super::exception::{self, GlobalEhState};
use super::guard::{self, Guard};
use super::unwind::{Unwinder, UnwindContext, UnwindHeader, UnwindReasonCode};
use super::personality;

static EH_STATE: spin::Mutex<GlobalEhState> = spin::Mutex::new(GlobalEhState::new());
static ATEXIT: spin::Mutex<AtExitRegistry> = spin::Mutex::new(AtExitRegistry::new());
static UNWINDER: spin::Once<&'static dyn Unwinder> = spin::Once::new();

/// Wires the concrete stack-unwinder collaborator in at kernel init.
/// Must be called exactly once before any `throw` reaches this crate's
/// `extern "C"` entry points; calling it twice is a programming error.
pub fn set_unwinder(unwinder: &'static dyn Unwinder) {
    let already_set = UNWINDER.is_completed();
    debug_assert!(!already_set, "set_unwinder called more than once");
    UNWINDER.call_once(|| unwinder);
}

fn unwinder() -> &'static dyn Unwinder {
    *UNWINDER
        .get()
        .expect("cxxabi::set_unwinder was never called before an exception was thrown")
}

/// # Safety
/// `thrown_exception` must be a payload pointer previously returned by
/// `__cxa_allocate_exception`, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn __cxa_throw(
    thrown_exception: *mut u8,
    tinfo: *const TypeInfo,
    dest: Option<unsafe extern "C" fn(*mut u8)>,
) -> ! {
    let header = exception::header_of(thrown_exception);
    let mut state = EH_STATE.lock();
    exception::cxa_throw(&mut state, unwinder(), header, tinfo, dest)
}

#[no_mangle]
pub extern "C" fn __cxa_rethrow() -> ! {
    let mut state = EH_STATE.lock();
    exception::cxa_rethrow(&mut state, unwinder())
}

/// # Safety
/// `exception_object` must be the `_Unwind_Exception` pointer the
/// personality routine just installed into the landing pad.
#[no_mangle]
pub unsafe extern "C" fn __cxa_begin_catch(exception_object: *mut u8) -> *mut u8 {
    let header = exception::header_of_unwind(exception_object as *mut UnwindHeader);
    let mut state = EH_STATE.lock();
    exception::cxa_begin_catch(&mut state, header)
}

#[no_mangle]
pub extern "C" fn __cxa_end_catch() {
    let mut state = EH_STATE.lock();
    exception::cxa_end_catch(&mut state, unwinder());
}

#[no_mangle]
pub extern "C" fn __cxa_allocate_exception(thrown_size: usize) -> *mut u8 {
    exception::alloc_exception(thrown_size)
}

/// # Safety
/// `thrown_exception` must not be used again after this call.
#[no_mangle]
pub unsafe extern "C" fn __cxa_free_exception(thrown_exception: *mut u8) {
    exception::free_exception(thrown_exception)
}

/// # Safety
/// `destructor`/`arg` must remain valid for the life of the program, or
/// until an earlier `__cxa_finalize` call removes this registration.
#[no_mangle]
pub unsafe extern "C" fn __cxa_atexit(
    destructor: unsafe extern "C" fn(*mut u8),
    arg: *mut u8,
    dso_handle: *mut u8,
) -> i32 {
    ATEXIT.lock().register(destructor, arg, dso_handle)
}

#[no_mangle]
pub extern "C" fn __cxa_finalize(dso_handle: *mut u8) {
    ATEXIT.lock().finalize(dso_handle);
}

/// # Safety
/// `guard` must point at a `Guard`-sized static the compiler emitted for
/// exactly one guarded local static.
#[no_mangle]
pub unsafe extern "C" fn __cxa_guard_acquire(guard: *mut Guard) -> i32 {
    guard_acquire_raw(guard) as i32
}

unsafe fn guard_acquire_raw(guard: *mut Guard) -> bool {
    guard::guard_acquire(&*guard)
}

/// # Safety
/// Same contract as `__cxa_guard_acquire`.
#[no_mangle]
pub unsafe extern "C" fn __cxa_guard_release(guard: *mut Guard) {
    guard::guard_release(&*guard)
}

/// # Safety
/// Same contract as `__cxa_guard_acquire`.
#[no_mangle]
pub unsafe extern "C" fn __cxa_guard_abort(guard: *mut Guard) {
    guard::guard_abort(&*guard)
}

/// The personality routine proper. `actions` follows `_Unwind_Action`:
/// bit 0 set selects the search phase, bit 1 set selects the install
/// (cleanup) phase.
///
/// # Safety
/// `context` must be a live `UnwindContext` supplied by the active
/// `Unwinder` implementation for the frame currently being unwound, and
/// `exception_class`/exception header must be consistent with what that
/// unwinder is currently propagating.
#[no_mangle]
pub unsafe extern "C" fn __gxx_personality_v0(
    _version: i32,
    actions: i32,
    _exception_class: u64,
    exception_header: *mut super::UnwindHeader,
    context: *mut UnwindContext,
) -> UnwindReasonCode {
    const SEARCH_PHASE: i32 = 1;

    let u = unwinder();
    let ctx = &mut *context;
    let lsda_ptr = u.get_lsda(ctx);
    if lsda_ptr == 0 {
        return UnwindReasonCode::ContinueUnwind;
    }
    // SAFETY: the unwinder guarantees `get_lsda` returns a pointer into a
    // live LSDA byte region for the frame being examined, for at least
    // the duration of this call.
    let lsda_bytes = core::slice::from_raw_parts(lsda_ptr as *const u8, 4096);
    let lsda = personality::parse_lsda(lsda_bytes);

    let ip = u.get_ip(ctx);
    let region_start = u.get_region_start(ctx);
    let ip_offset = (ip - region_start) as u64;

    let header = exception::header_of_unwind(exception_header);
    let thrown_type = (*header).abi.type_info;
    let is_search = actions & SEARCH_PHASE != 0;

    let reason = personality::personality(&lsda, ip_offset, thrown_type, is_search, ctx);
    if reason == UnwindReasonCode::InstallContext {
        u.set_ip(ctx, ctx.call_site);
        u.set_gr_data(ctx, 0, exception_header as usize);
        u.set_gr_data(ctx, 1, ctx.gr_data[1]);
    }
    reason
}

/// `'static` descriptors for the three standard-exception types the
/// compiler's own generated code (not this crate) raises through the
/// `__cxa_bad_*` entry points below — `bad_typeid`, `bad_cast`, and
/// `bad_array_new_length`, per §6.
static BAD_TYPEID_TYPE: TypeInfo = TypeInfo::ClassNoBases { name: "std::bad_typeid" };
static BAD_CAST_TYPE: TypeInfo = TypeInfo::ClassNoBases { name: "std::bad_cast" };
static BAD_ARRAY_NEW_LENGTH_TYPE: TypeInfo = TypeInfo::ClassNoBases { name: "std::bad_array_new_length" };

/// Allocates a zero-payload exception of `type_info` and raises it.
/// Shared by the three `__cxa_bad_*` entry points below; diverges like
/// `__cxa_throw`.
fn raise_standard_exception(type_info: &'static TypeInfo) -> ! {
    let payload = exception::alloc_exception(0);
    let header = exception::header_of(payload);
    let mut state = EH_STATE.lock();
    // SAFETY: `raise_standard_exception` is only called by the `__cxa_bad_*`
    // entry points below, never with a null or dangling `type_info`.
    unsafe { exception::cxa_throw(&mut state, unwinder(), header, type_info, None) }
}

/// A `dynamic_cast<T&>` that fails on a reference (rather than a pointer,
/// which just returns null) raises `std::bad_cast` through this entry
/// point.
#[no_mangle]
pub extern "C" fn __cxa_bad_cast() -> ! {
    raise_standard_exception(&BAD_CAST_TYPE)
}

/// A `typeid` applied through a null polymorphic pointer raises
/// `std::bad_typeid` through this entry point.
#[no_mangle]
pub extern "C" fn __cxa_bad_typeid() -> ! {
    raise_standard_exception(&BAD_TYPEID_TYPE)
}

/// `new T[n]` with a negative or overflowing `n` raises
/// `std::bad_array_new_length` through this entry point.
#[no_mangle]
pub extern "C" fn __cxa_throw_bad_array_new_length() -> ! {
    raise_standard_exception(&BAD_ARRAY_NEW_LENGTH_TYPE)
}

/// A call through an unoverridden pure-virtual vtable slot reaches this
/// entry point (the compiler installs it as every pure-virtual's
/// placeholder implementation). Unrecoverable: logs and aborts, matching
/// §6's contract — there is no sensible "adjusted pointer" to return to
/// calling code that dereferenced a pure-virtual slot.
#[no_mangle]
pub extern "C" fn __cxa_pure_virtual() -> ! {
    panic!("freestd::cxxabi: pure virtual function called");
}
