//! Itanium C++ ABI exception-handling runtime: exception object lifecycle,
//! the personality routine, guarded statics, and `atexit`/`at_quick_exit`
//! bookkeeping.
//!
//! Each sub-module is written as pure, dependency-injected logic so it can
//! be unit tested on the host; [`abi`] is the thin process-wide-singleton
//! layer that exposes the fixed `#[no_mangle] extern "C"` Itanium names a
//! real compiler's generated landing-pad code calls.

pub mod abi;
pub mod atexit;
pub mod exception;
pub mod guard;
pub mod personality;
pub mod unwind;

pub use exception::{AbiHeader, ExceptionHeader, GlobalEhState, GNU_CXX_EXCEPTION_CLASS};
pub use guard::Guard;
pub use unwind::{UnwindContext, UnwindHeader, UnwindReasonCode, Unwinder};
